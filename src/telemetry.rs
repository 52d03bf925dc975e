//! Telemetry sink for node transitions and probe outcomes.
//!
//! Sinks are fire-and-forget: `emit` never blocks and never fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::scheduler::NodeState;

/// A structured event produced during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    StateChanged {
        node: String,
        from: NodeState,
        to: NodeState,
        at: DateTime<Utc>,
    },
    ProbeOutcome {
        node: String,
        attempt: u32,
        success: bool,
        detail: Option<String>,
        at: DateTime<Utc>,
    },
}

impl TelemetryEvent {
    pub fn state_changed(node: &str, from: &NodeState, to: &NodeState) -> Self {
        TelemetryEvent::StateChanged {
            node: node.to_string(),
            from: from.clone(),
            to: to.clone(),
            at: Utc::now(),
        }
    }

    pub fn probe(node: &str, attempt: u32, success: bool, detail: Option<String>) -> Self {
        TelemetryEvent::ProbeOutcome {
            node: node.to_string(),
            attempt,
            success,
            detail,
            at: Utc::now(),
        }
    }

    pub fn node(&self) -> &str {
        match self {
            TelemetryEvent::StateChanged { node, .. } | TelemetryEvent::ProbeOutcome { node, .. } => {
                node
            }
        }
    }
}

/// Receives telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Writes every event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::StateChanged { node, from, to, .. } => {
                info!(
                    component = "telemetry",
                    node = node.as_str(),
                    from = from.label(),
                    to = to.label(),
                    "State changed"
                );
            }
            TelemetryEvent::ProbeOutcome {
                node,
                attempt,
                success,
                detail,
                ..
            } => {
                debug!(
                    component = "telemetry",
                    node = node.as_str(),
                    attempt = attempt,
                    success = success,
                    detail = detail.as_deref().unwrap_or(""),
                    "Probe outcome"
                );
            }
        }
    }
}

/// Forwards events into a bounded channel; events are dropped when full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TelemetryEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(component = "telemetry", "Telemetry event dropped: {}", e);
        }
    }
}

/// Fans one event out to several sinks.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl TelemetrySink for MultiSink {
    fn emit(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.emit(TelemetryEvent::probe("api", 1, false, Some("503".into())));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.node(), "api");
        assert!(matches!(
            event,
            TelemetryEvent::ProbeOutcome { attempt: 1, success: false, .. }
        ));
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.emit(TelemetryEvent::probe("a", 1, true, None));
        sink.emit(TelemetryEvent::probe("b", 1, true, None));
        assert_eq!(rx.try_recv().unwrap().node(), "a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_closed_receiver_is_silent() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        sink.emit(TelemetryEvent::probe("a", 1, true, None));
    }

    #[test]
    fn test_multi_sink_fans_out() {
        let (a, mut rx_a) = ChannelSink::new(2);
        let (b, mut rx_b) = ChannelSink::new(2);
        let sink = MultiSink::new().with(a).with(b).with(TracingSink);
        sink.emit(TelemetryEvent::state_changed(
            "sql",
            &NodeState::Pending,
            &NodeState::Starting,
        ));
        assert_eq!(rx_a.try_recv().unwrap().node(), "sql");
        assert_eq!(rx_b.try_recv().unwrap().node(), "sql");
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = TelemetryEvent::state_changed("db", &NodeState::Probing, &NodeState::Ready);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["to"]["state"], "ready");
    }
}
