//! Metrics sink boundary.
//!
//! Engine logic MUST NOT touch global metrics state directly: all
//! instrumentation flows through [`MetricsEvent`] and [`MetricsSink`]. The
//! thread-local override exists so tests can capture events without a
//! global registry.

use std::cell::RefCell;

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<*const dyn MetricsSink>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent {
    /// One stage finished, with its input/output cardinality.
    StageFinish {
        stage: &'static str,
        docs_in: usize,
        docs_out: usize,
    },
    /// A grouping surface materialized its groups.
    GroupsMaterialized { groups: usize },
    /// A bucketing stage emitted its buckets.
    BucketsEmitted { buckets: usize },
    /// A window-fill lookup hit the per-partition memo.
    FillCacheHit,
    /// A window-fill lookup computed a partition from scratch.
    FillCacheMiss,
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

///
/// NoopSink
///

struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _event: MetricsEvent) {}
}

/// Record one event against the active sink.
pub fn emit(event: MetricsEvent) {
    SINK_OVERRIDE.with(|cell| {
        if let Some(sink) = *cell.borrow() {
            // Pointer is only ever installed by `with_sink`, which keeps the
            // referent alive for the borrow's duration on this thread.
            unsafe { (*sink).record(event) };
        } else {
            NoopSink.record(event);
        }
    });
}

/// Run one closure with a sink override and always restore the previous
/// sink, even if the closure panics.
pub fn with_sink<T>(sink: &dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    // The thread-local stores `*const (dyn MetricsSink + 'static)`, so the
    // borrow's lifetime must be erased before installing the pointer. This
    // function restores the previous pointer before returning (even on
    // panic), so the erased pointer never outlives `sink`.
    let sink: &'static dyn MetricsSink = unsafe { std::mem::transmute(sink) };
    let previous = SINK_OVERRIDE.with(|cell| cell.replace(Some(std::ptr::from_ref(sink))));
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    SINK_OVERRIDE.with(|cell| {
        *cell.borrow_mut() = previous;
    });
    match result {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

///
/// TESTS
///
