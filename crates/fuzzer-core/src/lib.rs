pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod headers;
pub mod job;
pub mod models;
pub mod producer;
pub mod report;
pub mod shutdown;
pub mod sink;
pub mod stats;
pub mod template;
pub mod throttle;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{FuzzConfig, Timings};
pub use engine::Engine;
pub use error::FuzzError;
pub use filter::{Filters, parse_unique_numbers};
pub use headers::DefaultHeaders;
pub use models::{Event, FuzzRequest, FuzzResponse, FuzzResult, Headers};
pub use report::{RunEvent, RunReporter, TracingRunReporter};
pub use shutdown::{EngineState, StopReason};
pub use stats::StatsSnapshot;
pub use traits::{HeaderProvider, HttpClient, NoopTransform, RequestTransform, TunnelTransform};
