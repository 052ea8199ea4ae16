use thiserror::Error;

pub type Result<T> = std::result::Result<T, Problem>;

#[derive(Error, Debug)]
pub enum Problem {
    #[error("No compute-capable GPU device is available: {0}")]
    DeviceUnavailable(String),

    #[error("Cannot compile shader `{label}`: {message}")]
    ShaderCompile { label: String, message: String },

    #[error("Invalid field sample: {0}")]
    InvalidFieldSample(String),

    #[error("Cannot allocate buffer `{label}`: {requested} bytes requested, device limit is {limit}")]
    BufferAllocation {
        label: String,
        requested: u64,
        limit: u64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("The engine has been disposed")]
    Disposed,
}
