pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod exporter;
pub mod instrument;
pub mod names;
pub mod sampler;
pub mod store;

pub use config::TelemetryConfig;
pub use envelope::{ExportEnvelope, MetricKind, MetricPoint};
pub use error::{Result, TelemetryError};
pub use events::{AuthEvents, BusinessEvents, OrderItem};
pub use exporter::{Exporter, ExporterHandle};
pub use instrument::{RequestHandle, RequestInstrumentation};
pub use sampler::SystemSampler;
pub use store::{LatencyStats, MetricStore, MetricsSnapshot};
