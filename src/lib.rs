pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod presets;
pub mod quality;
pub mod recorder;
pub mod sink;
pub mod source;
pub mod transform;

pub use config::PipelineConfig;
pub use dataset::{Dataset, Row, Value};
pub use error::{PipelineError, Result};
pub use pipeline::{Orchestrator, RunSummary};
