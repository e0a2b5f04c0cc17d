use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use conduit_primitives::{LogLevel, TelemetryEvent, TelemetryEventKind, TelemetrySink};

/// Mirrors `tracing` events into `LOG`-kind telemetry events. A node installs this alongside its normal
/// `fmt` subscriber layer so the same log line that hits stdout also reaches
/// the telemetry consumer.
pub struct TelemetryLogLayer {
    node_id: String,
    sink: Arc<dyn TelemetrySink>,
}

impl TelemetryLogLayer {
    pub fn new(node_id: impl Into<String>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            node_id: node_id.into(),
            sink,
        }
    }
}

impl<S: Subscriber> Layer<S> for TelemetryLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = map_level(*event.metadata().level());

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let correlation_id = visitor
            .fields
            .remove("correlation_id")
            .map(|s| conduit_primitives::CorrelationId::from(s));

        self.sink.emit(TelemetryEvent::new(
            self.node_id.clone(),
            TelemetryEventKind::Log {
                level,
                message: visitor.message.unwrap_or_default(),
                correlation_id,
                context: visitor.fields,
            },
        ));
    }
}

fn map_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Collects the `message` field separately and everything else into a flat
/// string map, matching `TelemetryEventKind::Log`'s `context` shape.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(formatted);
        } else {
            self.fields.insert(field.name().to_string(), formatted);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::prelude::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl TelemetrySink for RecordingSink {
        fn emit(&self, event: TelemetryEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn bridges_a_tracing_event_into_a_log_telemetry_event() {
        let sink = Arc::new(RecordingSink::default());
        let layer = TelemetryLogLayer::new("node-a", sink.clone());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(correlation_id = "pkt_abc", "packet forwarded");
        });

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            TelemetryEventKind::Log { level, message, .. } => {
                assert_eq!(*level, LogLevel::Info);
                assert_eq!(message, "packet forwarded");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
