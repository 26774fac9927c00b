//! Guest logging.
//!
//! Messages a guest sends through `env::log` are re-emitted through `tracing`
//! tagged with the run's request id. Nothing is retained on the run.

use tracing::{debug, error, info, warn};
use wasm_pool_core::{LogLevel, SandboxContext};

/// Host side of `env::log`.
pub struct LoggingHost;

impl LoggingHost {
    /// Emit `message` at `level`.
    pub fn log(ctx: &SandboxContext, level: LogLevel, message: &str) {
        let request_id = &ctx.request_id;
        match level {
            LogLevel::Debug => debug!(request_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(request_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(request_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(request_id, guest_log = true, "{}", message),
        }
    }
}

/// Convert a numeric log level (0=debug, 1=info, 2=warn, 3=error).
///
/// Unknown values map to [`LogLevel::Info`].
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use wasmtime_wasi::WasiCtxBuilder;

    fn context() -> SandboxContext {
        SandboxContext::new("test-123".into(), WasiCtxBuilder::new().build_p1(), 65536)
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_logging_emits_through_tracing() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();

        let ctx = context();
        tracing::subscriber::with_default(subscriber, || {
            LoggingHost::log(&ctx, LogLevel::Info, "reading input");
            LoggingHost::log(&ctx, LogLevel::Error, "invalid data found");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("reading input"));
        assert!(lines[0].contains("test-123"));
        assert!(lines[0].contains("guest_log=true"));
        assert!(lines[1].contains("ERROR"));
        assert!(lines[1].contains("invalid data found"));
    }

    #[test]
    fn test_level_from_i32() {
        assert_eq!(level_from_i32(0), LogLevel::Debug);
        assert_eq!(level_from_i32(1), LogLevel::Info);
        assert_eq!(level_from_i32(2), LogLevel::Warn);
        assert_eq!(level_from_i32(3), LogLevel::Error);
        assert_eq!(level_from_i32(99), LogLevel::Info);
    }
}
