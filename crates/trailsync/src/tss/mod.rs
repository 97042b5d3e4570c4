mod container;
mod error;
mod snapshot;

pub use container::{PushOutcome, Tss, TssEvent};
pub use error::TssError;
