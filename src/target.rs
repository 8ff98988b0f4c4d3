use crate::context::{Context, ContextProvider};
use crate::error::TargetError;
use crate::filter::MessageFilter;
use crate::format::{format_message, merge, parse_text, TimestampZone};
use crate::record::{Level, LogRecord, Message};
use crate::sanitize::sanitize_record;
use crate::sink::ExportSink;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Configuration for [`JsonFileTarget`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Number of buffered records that triggers a flush. `0` disables the
    /// size trigger; only final flushes export then.
    pub export_interval: usize,
    /// Accepted levels. Empty accepts every level.
    pub levels: Vec<Level>,
    /// Accepted categories, `*` suffix for prefix match. Empty accepts all.
    pub categories: Vec<String>,
    /// Categories rejected even if `categories` matched.
    pub except: Vec<String>,
    /// Dotted variable paths copied into the `context` field. A leading
    /// `!` excludes a path.
    pub log_vars: Vec<String>,
    pub timestamp_zone: TimestampZone,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            export_interval: 1000,
            levels: Vec::new(),
            categories: Vec::new(),
            except: Vec::new(),
            log_vars: Vec::new(),
            timestamp_zone: TimestampZone::Utc,
        }
    }
}

/// What a call to [`JsonFileTarget::collect`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No flush ran; this many records are waiting in the buffer.
    Buffered(usize),
    /// A flush ran and exported this many records.
    Flushed(usize),
}

/// Point-in-time copy of the target counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStats {
    /// Records handed to `collect`, before filtering.
    pub collected: u64,
    /// Records rejected by the level/category filter.
    pub filtered: u64,
    pub exported: u64,
    /// Records lost because their flush failed.
    pub dropped: u64,
    pub failed_flushes: u64,
    pub flushes: u64,
}

#[derive(Default)]
struct Counters {
    collected: AtomicU64,
    filtered: AtomicU64,
    exported: AtomicU64,
    dropped: AtomicU64,
    failed_flushes: AtomicU64,
    flushes: AtomicU64,
}

/// Buffering log target writing one JSON object per record to an
/// [`ExportSink`].
///
/// Records are filtered, appended to an in-memory buffer and exported in a
/// batch once the buffer reaches `export_interval` records or a final flush
/// is requested. Every flush captures the [`ContextProvider`] once and
/// merges that snapshot into each record of the batch.
///
/// The target is shared by reference: `collect` takes `&self`, the buffer
/// and the sink sit behind their own mutexes, and the buffer lock is never
/// held while the sink runs. A `collect` that arrives while a flush is in
/// progress (from another thread, or from the sink itself) only buffers its
/// records; they go out with the next flush.
pub struct JsonFileTarget {
    config: TargetConfig,
    filter: MessageFilter,
    context: Option<Arc<dyn ContextProvider>>,
    sink: Mutex<Box<dyn ExportSink>>,
    buffer: Mutex<Vec<LogRecord>>,
    flushing: AtomicBool,
    counters: Counters,
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JsonFileTarget {
    pub fn new(config: TargetConfig, sink: impl ExportSink + 'static) -> Self {
        let filter = MessageFilter::new(
            config.levels.clone(),
            config.categories.clone(),
            config.except.clone(),
        );
        Self {
            config,
            filter,
            context: None,
            sink: Mutex::new(Box::new(sink)),
            buffer: Mutex::new(Vec::new()),
            flushing: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Enrich every flushed record with the metadata of `provider`.
    ///
    /// Without a provider records are written without `application`,
    /// `userId` and `context` fields.
    pub fn with_context(mut self, provider: impl ContextProvider + 'static) -> Self {
        self.context = Some(Arc::new(provider));
        self
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// Number of records waiting for the next flush.
    pub fn len(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TargetStats {
        let c = &self.counters;
        TargetStats {
            collected: c.collected.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
            exported: c.exported.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            failed_flushes: c.failed_flushes.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
        }
    }

    /// Buffer `records` and flush when the buffer is non-empty and either
    /// `is_final` is set or the buffer holds at least `export_interval`
    /// records.
    ///
    /// **Returns**
    /// - `Ok(FlushOutcome::Buffered(n))` if no flush ran.
    /// - `Ok(FlushOutcome::Flushed(n))` if `n` records were exported.
    /// - `Err(..)` if the flush failed. The batch is dropped, not retried,
    ///   so the buffer is empty afterwards in every case.
    pub fn collect(&self, records: Vec<LogRecord>, is_final: bool) -> Result<FlushOutcome, TargetError> {
        let received = records.len();
        let accepted = self.filter.apply(records);
        self.counters.collected.fetch_add(received as u64, Ordering::Relaxed);
        self.counters
            .filtered
            .fetch_add((received - accepted.len()) as u64, Ordering::Relaxed);

        let count = {
            let mut buffer = lock(&self.buffer);
            buffer.extend(accepted);
            buffer.len()
        };

        let interval = self.config.export_interval;
        let due = is_final || (interval > 0 && count >= interval);
        if count == 0 || !due {
            return Ok(FlushOutcome::Buffered(count));
        }

        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(FlushOutcome::Buffered(count));
        }
        let _guard = FlushGuard(&self.flushing);

        self.export_buffer()
    }

    /// Export everything buffered, regardless of `export_interval`, then
    /// flush the sink.
    ///
    /// If another flush is already running, nothing is exported, the sink
    /// is not flushed and `Ok(FlushOutcome::Buffered(n))` is returned; the
    /// `n` waiting records go out with the next flush.
    pub fn flush(&self) -> Result<FlushOutcome, TargetError> {
        let outcome = self.collect(Vec::new(), true)?;
        if let FlushOutcome::Flushed(_) = outcome {
            if let Err(source) = lock(&self.sink).flush() {
                return Err(TargetError::Export { dropped: 0, source });
            }
        }
        Ok(outcome)
    }

    fn export_buffer(&self) -> Result<FlushOutcome, TargetError> {
        let batch = std::mem::take(&mut *lock(&self.buffer));
        if batch.is_empty() {
            return Ok(FlushOutcome::Flushed(0));
        }
        let size = batch.len();
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);

        let batch = self.add_context(batch);
        let zone = self.config.timestamp_zone;
        let lines = match batch
            .into_iter()
            .map(|record| format_message(record, zone))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(lines) => lines,
            Err(err) => {
                self.record_failure(size);
                return Err(err.into());
            }
        };

        let exported = lock(&self.sink).export(&lines);
        match exported {
            Ok(()) => {
                self.counters.exported.fetch_add(size as u64, Ordering::Relaxed);
                Ok(FlushOutcome::Flushed(size))
            }
            Err(source) => {
                self.record_failure(size);
                Err(TargetError::Export { dropped: size, source })
            }
        }
    }

    fn record_failure(&self, dropped: usize) {
        self.counters.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Merge one context snapshot into the message of every record.
    fn add_context(&self, batch: Vec<LogRecord>) -> Vec<LogRecord> {
        let Some(provider) = &self.context else {
            return batch;
        };
        let context = Context::capture(provider.as_ref(), &self.config.log_vars).to_map();

        batch
            .into_iter()
            .map(|record| {
                let mut record = sanitize_record(record);
                record.message = Message::Map(merge(parse_text(&record.message), context.clone()));
                record
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContext;
    use crate::noop_sink::MemorySink;
    use crate::sink::SinkError;
    use serde_json::{json, Value};
    use std::sync::{OnceLock, Weak};

    fn config(interval: usize) -> TargetConfig {
        TargetConfig {
            export_interval: interval,
            ..TargetConfig::default()
        }
    }

    fn rec(text: &str) -> LogRecord {
        LogRecord::new(text, Level::Info, "app")
    }

    fn decoded(sink: &MemorySink) -> Vec<Value> {
        sink.lines()
            .iter()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn flushes_when_interval_reached() {
        let sink = MemorySink::new();
        let target = JsonFileTarget::new(config(3), sink.clone());

        assert_eq!(target.collect(vec![rec("a"), rec("b")], false).unwrap(), FlushOutcome::Buffered(2));
        assert!(sink.lines().is_empty());

        assert_eq!(target.collect(vec![rec("c")], false).unwrap(), FlushOutcome::Flushed(3));
        assert!(target.is_empty());
        let messages: Vec<_> = decoded(&sink).iter().map(|v| v["message"].clone()).collect();
        assert_eq!(messages, [json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn final_flush_ignores_interval() {
        let sink = MemorySink::new();
        let target = JsonFileTarget::new(config(100), sink.clone());
        target.collect(vec![rec("a")], false).unwrap();
        assert_eq!(target.collect(vec![], true).unwrap(), FlushOutcome::Flushed(1));
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn empty_buffer_never_exports() {
        let sink = MemorySink::new();
        let target = JsonFileTarget::new(config(1), sink.clone());
        assert_eq!(target.collect(vec![], true).unwrap(), FlushOutcome::Buffered(0));
        assert_eq!(sink.exports(), 0);
    }

    #[test]
    fn zero_interval_only_flushes_on_final() {
        let sink = MemorySink::new();
        let target = JsonFileTarget::new(config(0), sink.clone());
        for _ in 0..50 {
            target.collect(vec![rec("x")], false).unwrap();
        }
        assert_eq!(target.len(), 50);
        assert_eq!(target.flush().unwrap(), FlushOutcome::Flushed(50));
        assert_eq!(sink.exports(), 1);
    }

    #[test]
    fn filtered_records_are_not_buffered() {
        let sink = MemorySink::new();
        let target = JsonFileTarget::new(
            TargetConfig {
                levels: vec![Level::Error],
                ..config(10)
            },
            sink.clone(),
        );
        target
            .collect(vec![rec("info"), LogRecord::new("bad", Level::Error, "app")], false)
            .unwrap();
        assert_eq!(target.len(), 1);
        let stats = target.stats();
        assert_eq!(stats.collected, 2);
        assert_eq!(stats.filtered, 1);
    }

    #[test]
    fn context_is_shared_by_every_record_of_a_flush() {
        let sink = MemorySink::new();
        let provider = StaticContext::new("shop")
            .with_user_id("u-7")
            .with_variable("region", "eu")
            .with_variable("secret", "hidden");
        let target = JsonFileTarget::new(
            TargetConfig {
                log_vars: vec!["region".into()],
                ..config(0)
            },
            sink.clone(),
        )
        .with_context(provider);

        let records = (0..5).map(|i| rec(&format!("m{}", i))).collect();
        target.collect(records, true).unwrap();

        let lines = decoded(&sink);
        assert_eq!(lines.len(), 5);
        for line in &lines {
            assert_eq!(line["application"], json!("shop"));
            assert_eq!(line["userId"], json!("u-7"));
            assert_eq!(line["context"], json!({"region": "eu"}));
            assert_eq!(line["level"], json!("info"));
        }
    }

    struct CountingProvider(Arc<AtomicU64>);

    impl ContextProvider for CountingProvider {
        fn application(&self) -> String {
            self.0.fetch_add(1, Ordering::SeqCst);
            "counted".into()
        }
    }

    #[test]
    fn context_is_captured_once_per_flush() {
        let calls = Arc::new(AtomicU64::new(0));
        let target = JsonFileTarget::new(config(0), MemorySink::new())
            .with_context(CountingProvider(Arc::clone(&calls)));

        target.collect((0..5).map(|_| rec("x")).collect(), true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        target.collect(vec![rec("y")], true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fixed_fields_win_over_context_and_message() {
        let sink = MemorySink::new();
        let target = JsonFileTarget::new(config(0), sink.clone())
            .with_context(StaticContext::new("shop"));
        let mut fields = serde_json::Map::new();
        fields.insert("level".into(), json!("spoofed"));
        fields.insert("application".into(), json!("spoofed"));
        target
            .collect(vec![LogRecord::new(fields, Level::Error, "app")], true)
            .unwrap();

        let line = &decoded(&sink)[0];
        assert_eq!(line["level"], json!("error"));
        assert_eq!(line["application"], json!("shop"));
    }

    struct FailingSink;

    impl ExportSink for FailingSink {
        fn export(&mut self, _lines: &[String]) -> Result<(), SinkError> {
            Err("disk unavailable".into())
        }
    }

    #[test]
    fn failed_export_drops_batch_and_reports() {
        let target = JsonFileTarget::new(config(2), FailingSink);
        target.collect(vec![rec("a")], false).unwrap();

        let err = target.collect(vec![rec("b")], false).unwrap_err();
        match err {
            TargetError::Export { dropped, .. } => assert_eq!(dropped, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(target.is_empty());
        let stats = target.stats();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.failed_flushes, 1);
        assert_eq!(stats.exported, 0);

        // The target keeps working after a failure.
        assert_eq!(target.collect(vec![rec("c")], false).unwrap(), FlushOutcome::Buffered(1));
    }

    /// Sink that logs back into its own target while exporting.
    struct ReentrantSink {
        target: Arc<OnceLock<Weak<JsonFileTarget>>>,
        inner: MemorySink,
        nested: Arc<Mutex<Vec<FlushOutcome>>>,
    }

    impl ExportSink for ReentrantSink {
        fn export(&mut self, lines: &[String]) -> Result<(), SinkError> {
            if let Some(target) = self.target.get().and_then(Weak::upgrade) {
                let outcome = target
                    .collect(vec![LogRecord::new("writer note", Level::Debug, "sink")], true)
                    .map_err(|e| e.to_string())?;
                self.nested.lock().unwrap().push(outcome);
            }
            self.inner.export(lines)
        }
    }

    #[test]
    fn collect_from_inside_export_does_not_flush() {
        let slot = Arc::new(OnceLock::new());
        let nested = Arc::new(Mutex::new(Vec::new()));
        let inner = MemorySink::new();
        let target = Arc::new(JsonFileTarget::new(
            config(1),
            ReentrantSink {
                target: Arc::clone(&slot),
                inner: inner.clone(),
                nested: Arc::clone(&nested),
            },
        ));
        slot.set(Arc::downgrade(&target)).unwrap();

        assert_eq!(target.collect(vec![rec("first")], false).unwrap(), FlushOutcome::Flushed(1));
        assert_eq!(*nested.lock().unwrap(), [FlushOutcome::Buffered(1)]);
        assert_eq!(inner.lines().len(), 1);
        // The note written during export is waiting for the next flush.
        assert_eq!(target.len(), 1);
    }

    /// Sink that asks its own target to flush while exporting.
    struct FlushingSink {
        target: Arc<OnceLock<Weak<JsonFileTarget>>>,
        nested: Arc<Mutex<Vec<FlushOutcome>>>,
        sink_flushes: Arc<AtomicU64>,
    }

    impl ExportSink for FlushingSink {
        fn export(&mut self, _lines: &[String]) -> Result<(), SinkError> {
            if let Some(target) = self.target.get().and_then(Weak::upgrade) {
                target
                    .collect(vec![LogRecord::new("writer note", Level::Debug, "sink")], false)
                    .map_err(|e| e.to_string())?;
                let outcome = target.flush().map_err(|e| e.to_string())?;
                self.nested.lock().unwrap().push(outcome);
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            self.sink_flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn flush_during_running_flush_leaves_sink_alone() {
        let slot = Arc::new(OnceLock::new());
        let nested = Arc::new(Mutex::new(Vec::new()));
        let sink_flushes = Arc::new(AtomicU64::new(0));
        let target = Arc::new(JsonFileTarget::new(
            config(0),
            FlushingSink {
                target: Arc::clone(&slot),
                nested: Arc::clone(&nested),
                sink_flushes: Arc::clone(&sink_flushes),
            },
        ));
        slot.set(Arc::downgrade(&target)).unwrap();

        target.collect(vec![rec("first")], false).unwrap();
        assert_eq!(target.flush().unwrap(), FlushOutcome::Flushed(1));
        assert_eq!(*nested.lock().unwrap(), [FlushOutcome::Buffered(1)]);
        assert_eq!(sink_flushes.load(Ordering::SeqCst), 1);
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn concurrent_collectors_lose_nothing() {
        let sink = MemorySink::new();
        let target = Arc::new(JsonFileTarget::new(config(7), sink.clone()));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let target = Arc::clone(&target);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        target.collect(vec![rec(&format!("{}-{}", t, i))], false).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        target.flush().unwrap();

        assert_eq!(sink.lines().len(), 100);
        assert_eq!(target.stats().exported, 100);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: TargetConfig = serde_json::from_value(json!({
            "export_interval": 5,
            "levels": ["error", "warning"],
            "timestamp_zone": "local"
        }))
        .unwrap();
        assert_eq!(config.export_interval, 5);
        assert_eq!(config.levels, [Level::Error, Level::Warning]);
        assert_eq!(config.timestamp_zone, TimestampZone::Local);
        assert!(config.log_vars.is_empty());
    }
}
