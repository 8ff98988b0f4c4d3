use crate::record::{Level, LogRecord, Message};
use crate::sanitize::repair_utf8;
use crate::target::JsonFileTarget;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// feeds them to a [`JsonFileTarget`] through a bounded channel and a
/// single background task.
///
/// The emitting thread never touches the file: it only converts the event
/// and enqueues it. The background task hands records to the target in
/// batches and forces a final flush every `flush_interval`, on
/// [`LayerHandle::shutdown`], and when the layer is dropped.
pub struct JsonFileLayer {
    sender: mpsc::Sender<LogRecord>,
    target: Arc<JsonFileTarget>,
    /// Total events seen by the layer.
    pub total_events: Arc<AtomicU64>,
    /// Events handed to the target by the background task.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full.
    pub dropped_events: Arc<AtomicU64>,
}

impl JsonFileLayer {
    /// Create a new layer and spawn the background task that owns all
    /// calls into `target`.
    ///
    /// Minimal thresholds are enforced for `buffer`, `batch_size` and
    /// `flush_interval` to avoid degenerate configurations.
    ///
    /// The returned [`LayerHandle`] shuts the task down. Dropping it
    /// without calling [`LayerHandle::shutdown`] detaches the task, which
    /// then runs until the layer itself is dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        target: Arc<JsonFileTarget>,
        buffer: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> (Self, LayerHandle) {
        let buffer = buffer.max(16);
        let batch_size = batch_size.max(1);
        let flush_interval = flush_interval.max(Duration::from_millis(10));

        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let total_events = Arc::new(AtomicU64::new(0));
        let enqueued_events = Arc::new(AtomicU64::new(0));
        let dropped_events = Arc::new(AtomicU64::new(0));

        let enqueued_events_bg = Arc::clone(&enqueued_events);
        let target_bg = Arc::clone(&target);

        let join = tokio::spawn(async move {
            let mut ticker = interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            let mut detached = false;

            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(record) => {
                            let mut batch = Vec::with_capacity(batch_size);
                            batch.push(record);
                            while batch.len() < batch_size {
                                match rx.try_recv() {
                                    Ok(record) => batch.push(record),
                                    Err(_) => break,
                                }
                            }
                            enqueued_events_bg.fetch_add(batch.len() as u64, Ordering::Relaxed);
                            collect_batch(&target_bg, batch, false).await;
                        }
                        None => {
                            collect_batch(&target_bg, Vec::new(), true).await;
                            break;
                        }
                    },
                    signal = &mut shutdown_rx, if !detached => match signal {
                        Ok(()) => {
                            // Stop accepting events, then drain what is queued.
                            rx.close();
                            let mut rest = Vec::new();
                            while let Ok(record) = rx.try_recv() {
                                rest.push(record);
                            }
                            enqueued_events_bg.fetch_add(rest.len() as u64, Ordering::Relaxed);
                            collect_batch(&target_bg, rest, true).await;
                            break;
                        }
                        Err(_) => detached = true,
                    },
                    _ = ticker.tick() => {
                        collect_batch(&target_bg, Vec::new(), true).await;
                    }
                }
            }
        });

        (Self {
            sender: tx,
            target,
            total_events,
            enqueued_events,
            dropped_events,
        }, LayerHandle { shutdown: Some(shutdown_tx), join })
    }

    /// Target this layer feeds.
    pub fn target(&self) -> &Arc<JsonFileTarget> {
        &self.target
    }
}

/// Handle to the background task of a [`JsonFileLayer`].
pub struct LayerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl LayerHandle {
    /// Close the channel, export every queued event with a final flush and
    /// wait for the background task to finish.
    ///
    /// Events emitted after this call are dropped.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            // The task may already have exited because the layer was dropped.
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.join).await {
            eprintln!("log export task failed: {}", e);
        }
    }
}

/// Run one `collect` call on the blocking pool. Failures are reported on
/// stderr: logging them through `tracing` would feed them back into this
/// layer.
async fn collect_batch(target: &Arc<JsonFileTarget>, batch: Vec<LogRecord>, is_final: bool) {
    let target = Arc::clone(target);
    match tokio::task::spawn_blocking(move || target.collect(batch, is_final)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => eprintln!("error exporting log batch: {}", e),
        Err(e) => eprintln!("log export task failed: {}", e),
    }
}

impl<S> Layer<S> for JsonFileLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let mut fields = Map::new();
        let mut message: Option<Message> = None;
        let mut trace: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message, trace: &mut trace };
        event.record(&mut visitor);

        let meta = event.metadata();
        let record = LogRecord {
            message: event_message(message, fields),
            level: Level::from(*meta.level()),
            category: meta.target().to_string(),
            timestamp: Utc::now(),
            trace,
        };

        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("log channel full, dropping log record");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// A bare message stays a scalar; structured fields turn the message into
/// a map that also carries the `message` key.
fn event_message(message: Option<Message>, mut fields: Map<String, Value>) -> Message {
    if fields.is_empty() {
        return message.unwrap_or_else(|| Message::Text(String::new()));
    }
    if let Some(message) = message {
        let value = match message {
            Message::Text(text) | Message::Error(text) => Value::String(text),
            Message::Bytes(bytes) => Value::String(repair_utf8(&bytes).into_owned()),
            Message::Integer(i) => Value::from(i),
            Message::Map(map) | Message::Object(map) => Value::Object(map),
            Message::Other(value) => value,
        };
        fields.insert("message".to_string(), value);
    }
    Message::Map(fields)
}

use tracing::field::{Field, Visit};

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Map<String, Value>,
    pub message: &'a mut Option<Message>,
    pub trace: &'a mut Option<String>,
}

impl<'a> FieldVisitor<'a> {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => *self.message = Some(Message::Text(value.to_string())),
            "trace" => *self.trace = Some(value.to_string()),
            _ => self.insert(field, Value::String(value.to_string())),
        }
    }

    fn record_bytes(&mut self, field: &Field, value: &[u8]) {
        if field.name() == "message" {
            *self.message = Some(Message::Bytes(value.to_vec()));
        } else {
            self.insert(field, Value::String(repair_utf8(value).into_owned()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "message" {
            *self.message = Some(Message::Integer(value));
        } else {
            self.insert(field, Value::from(value));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "message" {
            *self.message = Some(Message::from_value(Value::from(value)));
        } else {
            self.insert(field, Value::from(value));
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if field.name() == "message" {
            *self.message = Some(Message::Other(Value::from(value)));
        } else {
            self.insert(field, Value::from(value));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "message" {
            *self.message = Some(Message::Other(Value::from(value)));
        } else {
            self.insert(field, Value::from(value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let message = Message::error(value);
        if field.name() == "message" {
            *self.message = Some(message);
        } else if let Message::Error(text) = message {
            self.insert(field, Value::String(text));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => *self.message = Some(Message::Text(format!("{:?}", value))),
            "trace" => *self.trace = Some(format!("{:?}", value)),
            _ => self.insert(field, Value::String(format!("{:?}", value))),
        }
    }
}
