use media_io::MediaError;
use thiserror::Error;

/// Why a thumbnail could not be produced. Cloned out of coalesced lookups, so the
/// underlying errors are kept as messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThumbnailError {
    #[error("not in any cache tier")]
    NotCached,
    #[error("extractor returned no frame")]
    NoFrame,
    #[error("frame extraction failed: {0}")]
    Extraction(String),
    #[error("rotation lookup failed: {0}")]
    Rotation(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("io: {0}")]
    Io(String),
    #[error("extraction took longer than {0:?}")]
    Timeout(std::time::Duration),
    #[error("lookup task aborted")]
    Aborted,
    #[error("no tokio runtime to run lookups on")]
    NoRuntime,
}

impl ThumbnailError {
    pub(crate) fn extraction(e: MediaError) -> Self { Self::Extraction(e.to_string()) }
    pub(crate) fn rotation(e: MediaError) -> Self { Self::Rotation(e.to_string()) }
}

impl From<std::io::Error> for ThumbnailError {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}

impl From<tokio::task::JoinError> for ThumbnailError {
    fn from(_: tokio::task::JoinError) -> Self { Self::Aborted }
}

pub type Result<T> = std::result::Result<T, ThumbnailError>;
