// src/core/telemetry.rs

//! A thin telemetry facade. Exporter implementations live outside the crate;
//! the wrapper only ever talks to these traits, and the null implementation
//! is the default so telemetry never costs anything unless switched on.

use std::sync::Arc;

/// How a trace context nests under whatever span the caller already has open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    TopLevel,
    Nested,
    ForceTopLevel,
}

pub trait TelemetryCounter: Send + Sync {
    fn add(&self, value: u64);

    fn inc(&self) {
        self.add(1);
    }
}

/// An open span around one suspension. Dropped (or explicitly closed) when the
/// wrapped call returns.
pub trait TelemetryContext: Send + Sync {
    fn set_attribute(&self, _key: &str, _value: &str) {}
    fn set_error(&self, _message: &str) {}
    fn close(&self) {}
}

pub trait TelemetryFactory: Send + Sync {
    fn create_counter(&self, name: &str) -> Arc<dyn TelemetryCounter>;

    /// Registers a gauge sampled through `callback` by the backend.
    fn create_gauge(&self, name: &str, callback: Box<dyn Fn() -> u64 + Send + Sync>);

    fn open_context(&self, name: &str, level: TraceLevel) -> Box<dyn TelemetryContext>;
}

/// The default factory: every instrument is a no-op.
#[derive(Debug, Default)]
pub struct NullTelemetryFactory;

struct NullCounter;

impl TelemetryCounter for NullCounter {
    fn add(&self, _value: u64) {}
}

struct NullContext;

impl TelemetryContext for NullContext {}

impl TelemetryFactory for NullTelemetryFactory {
    fn create_counter(&self, _name: &str) -> Arc<dyn TelemetryCounter> {
        Arc::new(NullCounter)
    }

    fn create_gauge(&self, _name: &str, _callback: Box<dyn Fn() -> u64 + Send + Sync>) {}

    fn open_context(&self, _name: &str, _level: TraceLevel) -> Box<dyn TelemetryContext> {
        Box::new(NullContext)
    }
}
