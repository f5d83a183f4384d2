use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to read guest memory. Expected and frequent during a walk.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("guest address {0:#x} is not mapped")]
    Unmapped(u64),
    #[error("guest address range overflows at {0:#x}")]
    Overflow(u64),
}

/// Failure to read the CPU state of the host.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    #[error("cpu {0} is not available")]
    NoSuchCpu(u32),
    #[error("cpu state read out of bounds at offset {offset:#x} ({len} bytes)")]
    OutOfBounds { offset: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid argument: {0}")]
    UnknownOption(String),
    #[error("argument is missing a value: {0}")]
    MissingValue(String),
    #[error("invalid delay {value:?}: {source}")]
    InvalidDelay {
        value: String,
        source: std::num::ParseIntError,
    },
}

/// Errors that prevent sampling from starting.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{}: {source}", .path.display())]
    Sink { path: PathBuf, source: io::Error },
    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),
}

impl InstallError {
    /// Status reported to the host when installation fails.
    pub fn exit_code(&self) -> i32 {
        match self {
            InstallError::Config(_) => 1,
            InstallError::Sink { .. } => 2,
            InstallError::UnsupportedTarget(_) => 3,
        }
    }
}

/// Reasons a sample did not reach the sink.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("output is closed")]
    Closed,
    #[error("gave up after {attempts} write attempts ({written} of {expected} bytes written)")]
    Exhausted {
        attempts: usize,
        written: usize,
        expected: usize,
    },
    #[error("could not write to output file: {0}")]
    Io(#[from] io::Error),
}
