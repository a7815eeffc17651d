//! Retry progress logging.
//!
//! Engines format their own summary lines (the layout is part of the engine
//! contract); a [`RetryLogger`] only decides where the lines go.

use std::sync::Mutex;

use ndarray::Array1;

/// Sink for pre-formatted retry summary lines. Implementations serialize
/// their own writes.
pub trait RetryLogger: Send + Sync {
    /// Consumes one summary line.
    fn log(&self, line: &str);
}

/// Forwards lines to the `log` facade at info level.
#[derive(Debug, Default)]
pub struct FacadeLogger;

impl RetryLogger for FacadeLogger {
    fn log(&self, line: &str) {
        log::info!(target: "glopt::retry", "{line}");
    }
}

/// Swallows all lines. Use when retry progress is uninteresting.
#[derive(Debug, Default)]
pub struct NullLogger;

impl RetryLogger for NullLogger {
    fn log(&self, _line: &str) {}
}

/// Collects lines in memory; handy in tests.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    /// Empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl RetryLogger for MemoryLogger {
    fn log(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Compact `[v1,v2,...]` rendering for value lists in summary lines.
pub(crate) fn fmt_values(values: &[f64]) -> String {
    let inner: Vec<String> = values.iter().map(|v| format!("{v:.6e}")).collect();
    format!("[{}]", inner.join(","))
}

/// Same rendering for coordinate vectors.
pub(crate) fn fmt_vector(x: &Array1<f64>) -> String {
    let inner: Vec<String> = x.iter().map(|v| format!("{v:.6e}")).collect();
    format!("[{}]", inner.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_memory_logger_collects() {
        let logger = MemoryLogger::new();
        logger.log("a");
        logger.log("b");
        assert_eq!(logger.lines(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_value_formatting() {
        assert_eq!(fmt_values(&[1.0]), "[1.000000e0]");
        assert_eq!(fmt_vector(&array![0.5, -2.0]), "[5.000000e-1,-2.000000e0]");
    }
}
