mod buffer;
mod payload;

pub use buffer::{FrameCommandBuffer, FrameOps, InsertOutcome};
pub use payload::{Command, CommandKey, CommandPayload};
