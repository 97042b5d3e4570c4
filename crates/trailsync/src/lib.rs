//! Trailing state synchronization: deterministic lock-step simulation with delayed state copies,
//! rollback by forward replay, and the client/server protocol around it.

pub mod codec;
pub mod command;
pub mod controller;
pub mod net;
pub mod state;
pub mod sync;
pub mod tss;

#[cfg(test)]
pub(crate) mod testing;

/// Simulation tick counter.
pub type Frame = u64;
pub type EntityId = u64;
pub type PlayerId = u32;

pub use codec::CodecError;
pub use command::{Command, CommandKey, CommandPayload, FrameCommandBuffer, FrameOps, InsertOutcome};
pub use controller::{
    ClientController, ConnectionState, ControllerError, ControllerEvent, DisconnectReason,
    FixedTimestep, SERVER_PLAYER, ServerController, SyncConfig,
};
pub use net::{
    DEFAULT_PORT, MemoryNetwork, MemoryTransport, Message, MessageKind, NetworkStats, Packet,
    PacketError, PacketLossSimulation, PlayerRegistry, Transport, UdpTransport,
};
pub use state::{SimulationState, StateHasher, Steppable};
pub use sync::{ClockSync, HashVerdict, HashVerifier};
pub use tss::{PushOutcome, Tss, TssError, TssEvent};
