//! Delivery counters for the bus.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use super::BusState;

/// Live counters updated by publishers and the dispatch loop
#[derive(Debug, Default)]
pub(crate) struct BusMetrics {
    events_published: AtomicU64,
    envelopes_dispatched: AtomicU64,
    events_without_handlers: AtomicU64,
    handler_invocations: AtomicU64,
    handler_successes: AtomicU64,
    handler_errors: AtomicU64,
    handler_panics: AtomicU64,
    handler_abandoned: AtomicU64,
    in_flight: AtomicUsize,
}

impl BusMetrics {
    pub(crate) fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self, handler_count: usize) {
        self.envelopes_dispatched.fetch_add(1, Ordering::Relaxed);
        if handler_count == 0 {
            self.events_without_handlers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn delivery_started(&self) {
        self.handler_invocations.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn delivery_finished(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Succeeded => &self.handler_successes,
            DeliveryOutcome::Failed => &self.handler_errors,
            DeliveryOutcome::Panicked => &self.handler_panics,
            DeliveryOutcome::Abandoned => &self.handler_abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(
        &self,
        state: BusState,
        topic_count: usize,
        handler_count: usize,
    ) -> BusStatistics {
        BusStatistics {
            state,
            topic_count,
            handler_count,
            events_published: self.events_published.load(Ordering::Relaxed),
            envelopes_dispatched: self.envelopes_dispatched.load(Ordering::Relaxed),
            events_without_handlers: self.events_without_handlers.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            handler_successes: self.handler_successes.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            handler_abandoned: self.handler_abandoned.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Succeeded,
    Failed,
    Panicked,
    /// Deadline passed or the producer cancelled before the handler finished
    Abandoned,
}

/// Point-in-time view of bus activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusStatistics {
    pub state: BusState,
    pub topic_count: usize,
    pub handler_count: usize,
    pub events_published: u64,
    pub envelopes_dispatched: u64,
    pub events_without_handlers: u64,
    pub handler_invocations: u64,
    pub handler_successes: u64,
    pub handler_errors: u64,
    pub handler_panics: u64,
    pub handler_abandoned: u64,
    pub in_flight: usize,
}

impl BusStatistics {
    /// Invocations that finished without success
    pub fn handler_failures(&self) -> u64 {
        self.handler_errors + self.handler_panics + self.handler_abandoned
    }
}
