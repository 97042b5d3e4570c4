mod client;
mod config;
mod server;
mod timestep;

use std::io;
use std::time::Duration;

pub use client::ClientController;
pub use config::SyncConfig;
pub use server::{SERVER_PLAYER, ServerController};
pub use timestep::FixedTimestep;

use crate::codec::CodecError;
use crate::net::PacketError;
use crate::tss::TssError;
use crate::{Frame, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Left,
    Denied,
    TimedOut,
    Kicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Connected { player: PlayerId, frame: Frame },
    Disconnected { reason: DisconnectReason },
    JoinDenied { reason: String },
    PlayerJoined { player: PlayerId, name: String },
    PlayerLeft { player: PlayerId, reason: DisconnectReason },
    /// A full snapshot was requested.
    Invalidated { frame: Frame },
    Synchronized { frame: Frame },
    ClockAdjusted { delta: i64 },
    HashMismatch { frame: Frame, local: u64, remote: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Tss(#[from] TssError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("not connected")]
    NotConnected,
    #[error("waiting for state synchronization")]
    AwaitingSnapshot,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Whether `interval` has passed since `last` on a session clock.
pub(crate) fn is_due(now: Duration, last: Option<Duration>, interval: Duration) -> bool {
    last.is_none_or(|at| now.saturating_sub(at) >= interval)
}
