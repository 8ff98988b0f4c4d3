use crate::sink::SinkError;

/// Error returned by [`JsonFileTarget::collect`](crate::target::JsonFileTarget::collect).
///
/// Both variants mean the flushed batch was dropped; the buffer is empty
/// afterwards either way.
#[derive(thiserror::Error, Debug)]
pub enum TargetError {
    #[error("failed to serialize log record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to export {dropped} log records: {source}")]
    Export {
        dropped: usize,
        #[source]
        source: SinkError,
    },
}
