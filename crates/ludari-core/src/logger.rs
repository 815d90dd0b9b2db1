//! Host-facing logger contract.
//!
//! The Manager emits its lifecycle lines through this trait and gates them
//! by `Control.log_level`, so the host decides where lines go while the
//! fleet decides how many of them there are.

/// Sink for the Manager's gated log lines.
///
/// Implementations must be cheap to call; the Manager invokes them from
/// timer tasks and never awaits around them.
pub trait Logger: Send + Sync {
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    /// Info-level line (named `log` after the host contract).
    fn log(&self, message: &str);
    fn debug(&self, message: &str);
}

/// Default logger forwarding to the `tracing` macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn log(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }
}
