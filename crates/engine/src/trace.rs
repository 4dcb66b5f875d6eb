//! W3C `traceparent` propagation across queue message boundaries.
//!
//! Grounded on `persistence/store.rs`'s `TraceContext` (plain
//! `trace_id`/`span_id`/`trace_flags` fields carried alongside a workflow
//! message) generalized from a hand-rolled triple into the standard
//! `opentelemetry::propagation` carrier format, bridged to/from the ambient
//! `tracing::Span` via `tracing-opentelemetry` rather than hand-parsing
//! traceparent headers. Spec §6's workflow message `traceCarrier?` field is
//! this type, serialized as its carrier map.

use std::collections::HashMap;

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use serde::{Deserialize, Serialize};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// The `traceparent`/`tracestate` headers an orchestrator run's trace
/// context is carried as, attached to its first workflow message and
/// restored as the parent of each subsequent replay pass's span.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TraceCarrier(HashMap<String, String>);

impl TraceCarrier {
    /// Captures the current `tracing::Span`'s context as a carrier, for
    /// attaching to a newly enqueued workflow or step message.
    pub fn capture() -> Self {
        let cx = tracing::Span::current().context();
        let mut fields = HashMap::new();
        TraceContextPropagator::new().inject_context(&cx, &mut MapInjector(&mut fields));
        Self(fields)
    }

    /// Sets this carrier's context as the parent of the current span, so a
    /// replay pass driven from a claimed message shows up as a child of the
    /// span that enqueued it rather than a disconnected root.
    pub fn set_as_parent(&self) {
        let cx = TraceContextPropagator::new().extract(&MapExtractor(&self.0));
        tracing::Span::current().set_parent(cx);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct MapInjector<'a>(&'a mut HashMap<String, String>);

impl Injector for MapInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

struct MapExtractor<'a>(&'a HashMap<String, String>);

impl Extractor for MapExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_capture_and_set_as_parent() {
        let span = tracing::info_span!("test-root");
        let _guard = span.enter();
        let carrier = TraceCarrier::capture();

        let other = tracing::info_span!("test-child");
        let _other_guard = other.enter();
        carrier.set_as_parent();
    }

    #[test]
    fn an_empty_carrier_is_empty() {
        assert!(TraceCarrier::default().is_empty());
    }
}
