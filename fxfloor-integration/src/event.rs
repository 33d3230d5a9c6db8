use chrono::{DateTime, Utc};
use derive_more::Display;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;

/// Category of an audit [`Event`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    #[display("trading")]
    Trading,
    #[display("system")]
    System,
    #[display("security")]
    Security,
    #[display("admin")]
    Admin,
}

/// Severity of an audit [`Event`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    #[display("debug")]
    Debug,
    #[display("info")]
    Info,
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
    #[display("critical")]
    Critical,
}

/// Append-only audit event.
///
/// Every order submission, reconciliation discrepancy, compliance rejection and task
/// lifecycle change produces one of these, keyed by category and a free-form kind.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Event {
    pub category: EventCategory,
    pub kind: SmolStr,
    pub severity: EventSeverity,
    pub time: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<SmolStr>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Event {
    pub fn new<Kind>(
        category: EventCategory,
        kind: Kind,
        severity: EventSeverity,
        description: impl Into<String>,
    ) -> Self
    where
        Kind: Into<SmolStr>,
    {
        Self {
            category,
            kind: kind.into(),
            severity,
            time: Utc::now(),
            description: description.into(),
            actor: None,
            account: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn trading<Kind>(
        kind: Kind,
        severity: EventSeverity,
        description: impl Into<String>,
    ) -> Self
    where
        Kind: Into<SmolStr>,
    {
        Self::new(EventCategory::Trading, kind, severity, description)
    }

    pub fn system<Kind>(kind: Kind, severity: EventSeverity, description: impl Into<String>) -> Self
    where
        Kind: Into<SmolStr>,
    {
        Self::new(EventCategory::System, kind, severity, description)
    }

    pub fn security<Kind>(
        kind: Kind,
        severity: EventSeverity,
        description: impl Into<String>,
    ) -> Self
    where
        Kind: Into<SmolStr>,
    {
        Self::new(EventCategory::Security, kind, severity, description)
    }

    pub fn with_account<S>(mut self, account: S) -> Self
    where
        S: Into<SmolStr>,
    {
        self.account = Some(account.into());
        self
    }

    pub fn with_actor<S>(mut self, actor: S) -> Self
    where
        S: Into<SmolStr>,
    {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Sink for append-only audit [`Event`]s.
///
/// Implementations persist events to the database; the in-memory sink backs tests
/// and standalone backtests.
pub trait EventSink: Send + Sync {
    fn record(&self, event: Event);
}

/// In-memory [`EventSink`] used for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Recorded events of the provided kind.
    pub fn events_of_kind(&self, kind: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&self, event: Event) {
        tracing::debug!(
            category = %event.category,
            kind = %event.kind,
            severity = %event.severity,
            "audit event recorded"
        );
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder_sets_context() {
        let event = Event::trading("order_submitted", EventSeverity::Info, "market order")
            .with_account("001-001-1234567-001")
            .with_details(serde_json::json!({"instrument": "EUR_USD"}));

        assert_eq!(event.category, EventCategory::Trading);
        assert_eq!(event.kind, "order_submitted");
        assert_eq!(event.account.as_deref(), Some("001-001-1234567-001"));
        assert_eq!(event.details["instrument"], "EUR_USD");
    }

    #[test]
    fn test_sink_filters_by_kind() {
        let sink = InMemoryEventSink::new();
        sink.record(Event::system("stream_started", EventSeverity::Info, "up"));
        sink.record(Event::trading("order_rejected", EventSeverity::Error, "down"));

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_of_kind("order_rejected").len(), 1);
    }

    #[test]
    fn test_event_serde_round_trip() {
        let event = Event::security("compliance_violation", EventSeverity::Warning, "fifo")
            .with_actor("user-7");
        let json = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, decoded);
    }
}
