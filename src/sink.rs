use std::error::Error;

/// Error type returned by [`ExportSink`] implementations.
pub type SinkError = Box<dyn Error + Send + Sync>;

/// Destination for the JSON lines produced by a flush.
///
/// Implementations own everything about persistence: where the lines go,
/// rotation, locking. The target calls `export` at most once per flush with
/// the lines of every buffered record, in collection order.
pub trait ExportSink: Send {
    /// Write one batch of lines.
    ///
    /// **Parameters**
    /// - `lines`: one serialized JSON object per entry, without trailing
    ///   newlines.
    ///
    /// **Returns**
    /// - `Ok(())` if the whole batch was accepted.
    /// - `Err(..)` if the backend failed. The target does not retry; the
    ///   batch is dropped and the error is returned to the caller of
    ///   `collect`.
    ///
    /// An implementation may emit `tracing` events from here. Those events
    /// are buffered by the target but never start a nested flush.
    fn export(&mut self, lines: &[String]) -> Result<(), SinkError>;

    /// Flush any buffered output, if the backend implements buffering.
    ///
    /// Default implementation is a no-op.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
