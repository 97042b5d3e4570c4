use crate::Frame;
use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum TssError {
    #[error("delays must be non-empty and strictly ascending, got {0:?}")]
    InvalidDelays(Vec<Frame>),
    #[error("frame {frame} is older than the trailing frame {trailing}")]
    Stale { frame: Frame, trailing: Frame },
    #[error("waiting for a full state synchronization")]
    AwaitingSnapshot,
    #[error("inconsistent snapshot: {0}")]
    MalformedSnapshot(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
