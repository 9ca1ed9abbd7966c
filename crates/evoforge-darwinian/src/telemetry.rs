//! Prometheus-backed event sink

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

use evoforge_common::{EventMeasurements, EventProperties, EventSink};

/// Counts events by name and keeps the last value of every measurement.
///
/// Metrics live on a private [`Registry`]; hosts either scrape
/// [`PrometheusEventSink::gather_text`] or merge the registry into their own.
pub struct PrometheusEventSink {
    registry: Registry,
    pub events_total: IntCounterVec,
    pub last_measurement: GaugeVec,
}

impl PrometheusEventSink {
    pub fn new() -> prometheus::Result<Self> {
        let events_total = IntCounterVec::new(
            Opts::new("evoforge_events_total", "Engine events emitted"),
            &["event"],
        )?;
        let last_measurement = GaugeVec::new(
            Opts::new(
                "evoforge_event_measurement",
                "Last measurement reported with an engine event",
            ),
            &["event", "measurement"],
        )?;

        let sink = Self {
            registry: Registry::new(),
            events_total,
            last_measurement,
        };
        sink.register()?;
        Ok(sink)
    }

    fn register(&self) -> prometheus::Result<()> {
        self.registry
            .register(Box::new(self.events_total.clone()))?;
        self.registry
            .register(Box::new(self.last_measurement.clone()))?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format of everything registered
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl EventSink for PrometheusEventSink {
    fn emit(&self, name: &str, _properties: &EventProperties, measurements: &EventMeasurements) {
        self.events_total.with_label_values(&[name]).inc();
        for (key, value) in measurements {
            self.last_measurement
                .with_label_values(&[name, key.as_str()])
                .set(*value);
        }
    }
}
