use std::collections::VecDeque;
use std::time::Duration;

use trailsync::{ControllerEvent, DisconnectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: Duration,
    pub level: LogLevel,
    pub message: String,
}

/// Bounded history of session events shown on the dashboard.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, at: Duration, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at,
            level,
            message: message.into(),
        });
    }

    pub fn record(&mut self, at: Duration, event: &ControllerEvent) {
        let (level, message) = describe(event);
        self.push(at, level, message);
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

pub fn describe(event: &ControllerEvent) -> (LogLevel, String) {
    match event {
        ControllerEvent::PlayerJoined { player, name } => {
            (LogLevel::Info, format!("Player {} ({}) joined", player, name))
        }
        ControllerEvent::PlayerLeft { player, reason } => {
            let level = match reason {
                DisconnectReason::TimedOut => LogLevel::Warn,
                _ => LogLevel::Info,
            };
            (level, format!("Player {} {}", player, reason_str(*reason)))
        }
        ControllerEvent::HashMismatch {
            frame,
            local,
            remote,
        } => (
            LogLevel::Error,
            format!("Hash mismatch at frame {}: {:016x} != {:016x}", frame, local, remote),
        ),
        other => (LogLevel::Info, format!("{:?}", other)),
    }
}

fn reason_str(reason: DisconnectReason) -> &'static str {
    match reason {
        DisconnectReason::Left => "left",
        DisconnectReason::Denied => "was denied",
        DisconnectReason::TimedOut => "timed out",
        DisconnectReason::Kicked => "was kicked",
    }
}
