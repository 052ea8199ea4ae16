pub mod contour;
pub mod device;
mod error;
pub mod field;
pub mod kernels;
pub mod render;
mod rng;
pub mod scheduler;
mod seepflow;
pub mod settings;

pub use device::{ComputeDevice, DeviceOptions};
pub use error::{Problem, Result};
pub use field::FieldSampleSet;
pub use render::scene::Layer;
pub use seepflow::{FieldReport, SeepFlow};
pub use settings::VisualizationConfig;
