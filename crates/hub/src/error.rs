use thiserror::Error;

use crate::channel::Channel;

/// Errors surfaced by the monitor core. Everything else (bad numeric fields)
/// is sanitized rather than rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("invalid channel '{0}': must be one of {names}", names = Channel::valid_names())]
    InvalidChannel(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
