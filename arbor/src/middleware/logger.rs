//! Access-log middleware emitting Common Log Format lines.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use log::{log, log_enabled, Level};

use crate::context::Context;
use crate::handler::{Handler, HandlerResult};
use crate::middleware::Middleware;

/// See [`access_log`].
pub struct AccessLog {
    level: Level,
    duration: bool,
}

impl AccessLog {
    /// Logs at the provided level.
    pub fn new(level: Level) -> AccessLog {
        AccessLog {
            level,
            duration: false,
        }
    }

    /// Logs at the provided level, with the elapsed time appended.
    pub fn with_duration(level: Level) -> AccessLog {
        AccessLog {
            level,
            duration: true,
        }
    }
}

#[async_trait]
impl Handler for AccessLog {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        // skip everything if logging is disabled
        if !log_enabled!(self.level) {
            return ctx.next().await;
        }

        let start = Instant::now();
        let result = ctx.next().await;

        let ip = ctx
            .client_addr()
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|| "-".to_string());
        let datetime = httpdate::fmt_http_date(SystemTime::now());
        let duration = if self.duration {
            let micros = start.elapsed().as_micros();
            if micros < 1_000 {
                format!(" - {}µs", micros)
            } else if micros < 1_000_000 {
                format!(" - {:.2}ms", (micros as f32) / 1_000.0)
            } else {
                format!(" - {:.2}s", (micros as f32) / 1_000_000.0)
            }
        } else {
            String::new()
        };

        log!(
            self.level,
            "{} - - [{}] \"{} {} {:?}\" {} {}{}",
            ip,
            datetime,
            ctx.method(),
            ctx.path(),
            ctx.version(),
            ctx.writer().status().as_u16(),
            ctx.writer().size().max(0),
            duration
        );

        result
    }
}

/// Builds the access-log middleware.
pub fn access_log(level: Level) -> Middleware {
    Arc::new(AccessLog::new(level))
}

/// Builds the access-log middleware with durations appended.
pub fn access_log_with_duration(level: Level) -> Middleware {
    Arc::new(AccessLog::with_duration(level))
}
