use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid byte quantity '{0}'")]
    InvalidByteQuantity(String),

    #[error("invalid GPU board inventory '{0}': expected SLOTSxVRAM entries, e.g. 4x16GiB,2x8GiB")]
    InvalidGpuInventory(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
