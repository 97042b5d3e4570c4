mod clock;
mod hash_check;

pub use clock::{ClockSync, frame_delta};
pub use hash_check::{HashVerdict, HashVerifier};
