pub mod config;
pub mod error;
pub mod experiment;
pub mod resource;

pub use config::Config;
pub use error::CoreError;
pub use experiment::ExperimentRequest;
pub use resource::{GpuBoard, Resource};
