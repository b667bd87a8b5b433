//! W3C-style trace context carried across RPCs and event envelopes.

use hub_proto::pb::AgentEvent;
use tonic::metadata::MetadataMap;
use uuid::Uuid;

const TRACEPARENT_KEY: &str = "traceparent";

/// Identifiers tying an event to the trace it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: String,
    span_id: String,
}

impl TraceContext {
    /// Starts a fresh trace.
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
        }
    }

    /// Continues the same trace under a new span.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
        }
    }

    /// Returns the 32-hex-digit trace id.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Returns the 16-hex-digit span id.
    #[must_use]
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Renders the `traceparent` header value.
    #[must_use]
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Parses a `traceparent` header value.
    #[must_use]
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let _flags = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if version.len() != 2 || !is_lower_hex(version) {
            return None;
        }
        if trace_id.len() != 32 || !is_lower_hex(trace_id) || trace_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if span_id.len() != 16 || !is_lower_hex(span_id) || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        Some(Self {
            trace_id: trace_id.to_owned(),
            span_id: span_id.to_owned(),
        })
    }

    /// Extracts the trace context from incoming request metadata.
    #[must_use]
    pub fn from_metadata(metadata: &MetadataMap) -> Option<Self> {
        let value = metadata.get(TRACEPARENT_KEY)?.to_str().ok()?;
        Self::from_traceparent(value)
    }

    /// Injects the trace context into outgoing request metadata.
    pub fn inject_metadata(&self, metadata: &mut MetadataMap) {
        if let Ok(value) = self.traceparent().parse() {
            metadata.insert(TRACEPARENT_KEY, value);
        }
    }

    /// Reads the trace context out of an event envelope.
    #[must_use]
    pub fn from_event(event: &AgentEvent) -> Option<Self> {
        if event.trace_id.is_empty() || event.span_id.is_empty() {
            return None;
        }
        Some(Self {
            trace_id: event.trace_id.clone(),
            span_id: event.span_id.clone(),
        })
    }

    /// Writes the trace context onto an event envelope.
    pub fn apply_event(&self, event: &mut AgentEvent) {
        event.trace_id = self.trace_id.clone();
        event.span_id = self.span_id.clone();
    }
}

fn new_span_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..16].to_owned()
}

fn is_lower_hex(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceparent_round_trips() {
        let context = TraceContext::new_root();
        let parsed = TraceContext::from_traceparent(&context.traceparent()).unwrap();
        assert_eq!(parsed, context);
    }

    #[test]
    fn child_keeps_trace_and_rotates_span() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_ne!(child.span_id(), root.span_id());
    }

    #[test]
    fn rejects_malformed_traceparent() {
        for bad in [
            "",
            "00-short-span-01",
            "00-00000000000000000000000000000000-1111111111111111-01",
            "00-ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ-1111111111111111-01",
            "00-11111111111111111111111111111111-0000000000000000-01",
            "00-11111111111111111111111111111111-1111111111111111-01-extra",
        ] {
            assert!(TraceContext::from_traceparent(bad).is_none(), "{bad}");
        }
    }

    #[test]
    fn metadata_round_trips() {
        let context = TraceContext::new_root();
        let mut metadata = MetadataMap::new();
        context.inject_metadata(&mut metadata);
        assert_eq!(TraceContext::from_metadata(&metadata), Some(context));
    }

    #[test]
    fn event_round_trips() {
        let context = TraceContext::new_root();
        let mut event = AgentEvent::default();
        assert!(TraceContext::from_event(&event).is_none());
        context.apply_event(&mut event);
        assert_eq!(TraceContext::from_event(&event), Some(context));
    }
}
