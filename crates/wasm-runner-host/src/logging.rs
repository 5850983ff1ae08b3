//! Guest logging.
//!
//! Messages a module sends through `env::log` are appended to the
//! invocation's diagnostics, after its standard error, and relayed to the
//! process log with them.

use tracing::debug;
use wasm_runner_core::store::{InvocationContext, LogLevel};

/// Longest message kept from a single `env::log` call, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024;

/// Host side of the guest logging call.
pub struct LoggingHost;

impl LoggingHost {
    /// Record `message` at `level` for the current invocation.
    ///
    /// Messages longer than [`MAX_MESSAGE_BYTES`] are truncated on a
    /// character boundary.
    pub fn log(ctx: &mut InvocationContext, level: LogLevel, message: &str) {
        let message = truncate(message, MAX_MESSAGE_BYTES);

        debug!(
            invocation_id = %ctx.invocation_id,
            slot = ctx.slot,
            guest_log = true,
            level = %level,
            "{}",
            message
        );

        ctx.log(level, message.to_string());
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// 0=debug, 1=info, 2=warn, 3=error; anything else is treated as info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

fn truncate(message: &str, max: usize) -> &str {
    if message.len() <= max {
        return message;
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime_wasi::WasiCtxBuilder;

    fn context() -> InvocationContext {
        InvocationContext::new(1, WasiCtxBuilder::new().build_p1())
    }

    #[test]
    fn test_logging_stores_in_context() {
        let mut ctx = context();

        LoggingHost::log(&mut ctx, LogLevel::Info, "Hello");
        LoggingHost::log(&mut ctx, LogLevel::Error, "World");

        assert_eq!(ctx.logs.len(), 2);
        assert_eq!(ctx.logs[1].message, "World");
        assert_eq!(ctx.render_logs(), b"INFO Hello\nERROR World\n");
    }

    #[test]
    fn test_long_message_truncated() {
        let mut ctx = context();
        let message = "é".repeat(MAX_MESSAGE_BYTES);

        LoggingHost::log(&mut ctx, LogLevel::Warn, &message);

        let kept = &ctx.logs[0].message;
        assert!(kept.len() <= MAX_MESSAGE_BYTES);
        assert!(kept.chars().all(|c| c == 'é'));
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
