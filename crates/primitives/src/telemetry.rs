use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use time::OffsetDateTime;

use crate::{Amount, CorrelationId, PeerId, TokenId};

/// Amounts on the telemetry wire are always strings. `serde_with::DisplayFromStr` gives us that
/// for free off `Amount = u128`'s `Display` impl.
#[serde_as]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireAmount(#[serde_as(as = "DisplayFromStr")] pub Amount);

/// One telemetry event. Every variant serializes with `type`, `nodeId`, and
/// `timestamp` alongside its own payload fields (an internally-tagged enum),
/// matching this wire shape:
/// `{ "type": <string>, "nodeId": <string>, "timestamp": <RFC3339>, ...payload }`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub node_id: String,
    #[serde_as(as = "time::format_description::well_known::Rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub kind: TelemetryEventKind,
}

impl TelemetryEvent {
    pub fn new(node_id: impl Into<String>, kind: TelemetryEventKind) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp: OffsetDateTime::now_utc(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum TelemetryEventKind {
    NodeStatus {
        status: String,
    },
    PacketReceived {
        from_peer: PeerId,
        correlation_id: CorrelationId,
        amount: WireAmount,
    },
    PacketSent {
        to_peer: PeerId,
        correlation_id: CorrelationId,
        amount: WireAmount,
    },
    RouteLookup {
        destination: String,
        selected_peer: Option<PeerId>,
    },
    Log {
        level: LogLevel,
        message: String,
        correlation_id: Option<CorrelationId>,
        context: std::collections::BTreeMap<String, String>,
    },
    AccountBalance {
        peer: PeerId,
        token: TokenId,
        debit_balance: WireAmount,
        credit_balance: WireAmount,
        net_balance: i128,
    },
    SettlementRequired {
        peer: PeerId,
        token: TokenId,
        current_balance: WireAmount,
        threshold: WireAmount,
        exceeds_by: WireAmount,
    },
    SettlementTriggered {
        peer: PeerId,
        token: TokenId,
        amount: WireAmount,
    },
    SettlementCompleted {
        peer: PeerId,
        token: TokenId,
        amount: WireAmount,
    },
    XrpChannelOpened {
        peer: PeerId,
        channel_id: String,
    },
    XrpChannelClaimed {
        peer: PeerId,
        channel_id: String,
        amount: WireAmount,
    },
    XrpChannelClosed {
        peer: PeerId,
        channel_id: String,
    },
    AgentBalanceChanged {
        peer: PeerId,
        token: TokenId,
        delta: i128,
    },
    FraudDetected {
        peer: PeerId,
        rule: String,
        severity: String,
        details: Option<String>,
    },
    PeerPaused {
        peer: PeerId,
        reason: String,
    },
    PeerResumed {
        peer: PeerId,
    },
}

/// Non-blocking telemetry sink.
///
/// Every component that observes something fire-and-forgets an event through
/// this trait rather than holding a reference to the telemetry emitter's
/// internals. Implementations must never block or panic;
/// `conduit-telemetry::TelemetryEmitter` is the production implementation,
/// and tests use a simple `Vec`-backed recorder.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// A sink that discards every event. Useful as a default/test double.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_includes_type_node_and_timestamp() {
        let event = TelemetryEvent::new(
            "node-1",
            TelemetryEventKind::AccountBalance {
                peer: PeerId::from("peer-a"),
                token: TokenId::from("ILP"),
                debit_balance: WireAmount(1000),
                credit_balance: WireAmount(0),
                net_balance: -1000,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ACCOUNT_BALANCE");
        assert_eq!(json["nodeId"], "node-1");
        assert_eq!(json["debitBalance"], "1000");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn log_event_shape() {
        let event = TelemetryEvent::new(
            "node-1",
            TelemetryEventKind::Log {
                level: LogLevel::Info,
                message: "hello".into(),
                correlation_id: Some(CorrelationId::generate()),
                context: Default::default(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "LOG");
        assert_eq!(json["level"], "info");
    }
}
