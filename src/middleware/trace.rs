//! Per-request tracing span.

use std::time::{Duration, Instant};

use tracing::{Instrument, info, info_span};

use super::{BoxFuture, Middleware, Next};
use crate::context::Context;

/// Opens a `request` span carrying method and path, and logs the final
/// status and latency once the rest of the chain has finished.
///
/// Register it first so the span covers every other middleware.
pub struct Trace;

impl Middleware for Trace {
    fn name(&self) -> &str {
        "trace"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        let span = info_span!(
            "request",
            method = %ctx.request().method(),
            path = %ctx.request().path(),
        );
        let start = Instant::now();

        Box::pin(
            async move {
                next.run(ctx).await;
                info!(
                    status = ctx.response().status().as_u16(),
                    latency_us = micros(start.elapsed()),
                    "request completed",
                );
            }
            .instrument(span),
        )
    }
}

/// Whole microseconds in `elapsed`, saturating at `u64::MAX`.
fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
