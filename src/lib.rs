pub mod record;
pub mod filter;
pub mod context;
pub mod sanitize;
pub mod format;
pub mod sink;
pub mod file;
pub mod error;
pub mod target;
pub mod layer;

pub mod init;
pub mod noop_sink;

pub use context::{ContextProvider, EnvironmentContext, StaticContext};
pub use error::TargetError;
pub use file::{FileConfig, FileSink};
pub use record::{Level, LogRecord, Message};
pub use target::{FlushOutcome, JsonFileTarget, TargetConfig};
