//! Dispatch tick span helpers.
//!
//! Provides span creation and outcome recording for polling ticks.

use tracing::Span;
use uuid::Uuid;

use crate::cycle::TickReport;

/// Start a span for one polling tick.
///
/// The outcome fields are declared empty and filled in by
/// [`record_tick_outcome`] when the tick finishes.
pub fn start_tick_span(dispatcher_id: &Uuid, tick: u64) -> Span {
    tracing::info_span!(
        "dispatch.tick",
        "dispatch.id" = %dispatcher_id,
        "dispatch.tick" = tick,
        "dispatch.obtained" = tracing::field::Empty,
        "dispatch.admitted" = tracing::field::Empty,
        "dispatch.rejected" = tracing::field::Empty,
    )
}

/// Record what a tick did on its span.
pub fn record_tick_outcome(span: &Span, report: &TickReport) {
    span.record("dispatch.obtained", report.obtained as u64);
    span.record("dispatch.admitted", report.admitted as u64);
    span.record(
        "dispatch.rejected",
        (report.rejected_in_flight + report.rejected_completed) as u64,
    );
}
