//! DSP engine error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DspError {
    #[error("no usable DSP plugins for this stream")]
    NoUsablePlugins,

    #[error("settings store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings store parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type DspResult<T> = Result<T, DspError>;
