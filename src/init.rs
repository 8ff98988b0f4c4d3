use crate::layer::{JsonFileLayer, LayerHandle};
use crate::target::JsonFileTarget;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Конфигурация слоя логирования.
///
/// Управляет размером канала между приложением и фоновой задачей,
/// максимальным числом записей, передаваемых в target за один вызов,
/// частотой принудительного flush, а также тем, нужно ли дополнительно
/// печатать события в консоль через `fmt`‑слой.
///
/// **Поля**
/// - `channel_buffer`: максимальное число [`LogRecord`](crate::record::LogRecord)
///   в очереди до начала дропа новых записей.
/// - `batch_size`: сколько записей фоновая задача забирает из канала
///   за один вызов `collect`.
/// - `flush_interval`: максимальный интервал между финальными flush’ами,
///   даже если `export_interval` target’а не достигнут.
/// - `enable_stdout`: если `true`, поверх `JsonFileLayer` добавляется
///   `tracing_subscriber::fmt::Layer` и события печатаются в консоль.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            enable_stdout: false,
        }
    }
}

/// Initialize global `tracing` subscriber writing through `target`.
///
/// **Parameters**
/// - `target`: [`JsonFileTarget`] that buffers, enriches and exports the
///   records built from events.
/// - `config`: [`LayerConfig`] controlling the channel and flush cadence
///   of the layer.
///
/// **Returns**
/// - A [`LayerHandle`] on success. The global subscriber lives until the
///   process exits, so its channel never closes on its own: call
///   [`LayerHandle::shutdown`] before exiting to export what is still queued.
/// - `Err(..)` if a global subscriber was already installed.
///
/// Must be called from within a Tokio runtime.
pub fn init_tracing_with_config(
    target: Arc<JsonFileTarget>,
    config: LayerConfig,
) -> Result<LayerHandle, SetGlobalDefaultError> {
    let (layer, handle) = JsonFileLayer::new(
        target,
        config.channel_buffer,
        config.batch_size,
        config.flush_interval,
    );

    // Слой с target’ом подключается всегда; `fmt`‑слой только при
    // `enable_stdout = true`. Типы subscriber’ов различаются, поэтому
    // собираем их в двух ветках.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(handle)
}

/// Initialize tracing with sensible defaults.
///
/// Equivalent to calling [`init_tracing_with_config`] with
/// [`LayerConfig::default`].
pub fn init_tracing(target: Arc<JsonFileTarget>) -> Result<LayerHandle, SetGlobalDefaultError> {
    init_tracing_with_config(target, LayerConfig::default())
}
