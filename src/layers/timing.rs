// SPDX-License-Identifier: BSD-3-Clause
use std::time::{Duration, Instant};

use tracing::{span, Id, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Prints the time spent inside each span, summed over all of its entries,
/// when the span closes.
#[derive(Debug, Default)]
pub struct SpanTimingLayer;

#[derive(Debug, Default)]
struct Timing {
    busy: Duration,
    entered: Option<Instant>,
    entries: usize,
}

impl<S> Layer<S> for SpanTimingLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(Timing::default());
        }
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(timing) = span.extensions_mut().get_mut::<Timing>() {
                timing.entered = Some(Instant::now());
                timing.entries += 1;
            }
        }
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(timing) = span.extensions_mut().get_mut::<Timing>() {
                if let Some(start) = timing.entered.take() {
                    timing.busy += start.elapsed();
                }
            }
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(&id) {
            if let Some(timing) = span.extensions().get::<Timing>() {
                eprintln!(
                    "{}: {}ns over {} entries",
                    span.name(),
                    timing.busy.as_nanos(),
                    timing.entries
                );
            }
        }
    }
}
