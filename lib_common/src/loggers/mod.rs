/// `tracing` subscriber setup with console output and rotated JSON log files.
pub mod loggerlocal;

pub use loggerlocal::{LoggerError, LoggerGuard, LoggerLocal, LoggerLocalOptions};
