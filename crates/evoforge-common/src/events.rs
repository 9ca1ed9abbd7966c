//! Event sinks
//!
//! Fire-and-forget reporting of cycle completion, mutation outcomes and
//! threshold breaches. The engine must behave identically whether or not a
//! sink drops events.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

/// String-valued event properties
pub type EventProperties = HashMap<String, String>;

/// Numeric event measurements
pub type EventMeasurements = HashMap<String, f64>;

/// Event names emitted by the engine
pub mod names {
    pub const CYCLE_COMPLETED: &str = "evolution.cycle.completed";
    pub const CYCLE_ABORTED: &str = "evolution.cycle.aborted";
    pub const MUTATION_OUTCOME: &str = "evolution.mutation.outcome";
    pub const DIVERSITY_BREACH: &str = "evolution.diversity.breach";
    pub const CONVERGED: &str = "evolution.converged";
    pub const AGENT_ARCHIVED: &str = "archive.agent.archived";
}

/// Event sink
pub trait EventSink: Send + Sync {
    /// Emit an event. Must not block and must not fail.
    fn emit(&self, name: &str, properties: &EventProperties, measurements: &EventMeasurements);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _name: &str, _properties: &EventProperties, _measurements: &EventMeasurements) {}
}

/// Sink that turns events into structured `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, name: &str, properties: &EventProperties, measurements: &EventMeasurements) {
        info!(
            event = name,
            properties = ?properties,
            measurements = ?measurements,
            "evolution event"
        );
    }
}

/// A recorded event
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub name: String,
    pub properties: EventProperties,
    pub measurements: EventMeasurements,
}

/// Sink that keeps events in memory, bounded to the most recent `capacity`
#[derive(Debug)]
pub struct MemoryEventSink {
    events: RwLock<Vec<RecordedEvent>>,
    capacity: usize,
}

impl MemoryEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            capacity,
        }
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.read().iter().filter(|e| e.name == name).count()
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, name: &str, properties: &EventProperties, measurements: &EventMeasurements) {
        let mut events = self.events.write();
        if events.len() >= self.capacity {
            events.remove(0);
        }
        events.push(RecordedEvent {
            name: name.to_string(),
            properties: properties.clone(),
            measurements: measurements.clone(),
        });
    }
}
