use std::fmt;
use std::sync::Mutex;

/// Severity of a run audit line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Sink for per-stage audit lines emitted while a run executes.
///
/// The orchestrator and its collaborators receive an implementation at
/// construction and report through it instead of writing to global logger
/// state directly. Every line names the pipeline stage and the entity (a
/// locus or an allele) it concerns, so soft failures can be audited after
/// the run completes.
pub trait RunLogger: Send + Sync {
    fn log(&self, level: LogLevel, stage: &str, entity: &str, message: &str);

    fn info(&self, stage: &str, entity: &str, message: &str) {
        self.log(LogLevel::Info, stage, entity, message);
    }

    fn warn(&self, stage: &str, entity: &str, message: &str) {
        self.log(LogLevel::Warn, stage, entity, message);
    }

    fn error(&self, stage: &str, entity: &str, message: &str) {
        self.log(LogLevel::Error, stage, entity, message);
    }
}

/// Forwards audit lines to the `log` facade; the binary installs
/// `env_logger` behind it.
#[derive(Default)]
pub struct FacadeLogger;

impl RunLogger for FacadeLogger {
    fn log(&self, level: LogLevel, stage: &str, entity: &str, message: &str) {
        match level {
            LogLevel::Info => log::info!("[{stage}] {entity}: {message}"),
            LogLevel::Warn => log::warn!("[{stage}] {entity}: {message}"),
            LogLevel::Error => log::error!("[{stage}] {entity}: {message}"),
        }
    }
}

/// Captures audit lines in memory so tests can assert on what a run logged.
#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().expect("logger mutex poisoned").clone()
    }

    /// True if any captured line at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .expect("logger mutex poisoned")
            .iter()
            .any(|(l, line)| *l == level && line.contains(needle))
    }
}

impl RunLogger for MemoryLogger {
    fn log(&self, level: LogLevel, stage: &str, entity: &str, message: &str) {
        self.lines
            .lock()
            .expect("logger mutex poisoned")
            .push((level, format!("[{stage}] {entity}: {message}")));
    }
}
