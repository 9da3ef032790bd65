pub mod record;
pub mod sink;
pub mod layer;
pub mod dispatch;

pub mod timer;
pub mod context;
pub mod redact;
pub mod formatter;
pub mod logger;

pub mod backend;
pub mod env;
pub mod init;

pub mod memory_sink;
pub mod stdout_sink;
pub mod file_sink;

pub use context::{ContextMap, ContextStore, ContextValue, FutureExt, LocalContext};
pub use init::{init_logging, init_logging_from_env, init_logging_with_config, LoggingConfig, LoggingHandle};
pub use logger::Logger;
pub use record::LogRecord;
pub use timer::ElapsedTimer;
