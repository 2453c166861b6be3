use std::fmt::{Debug, Display, Formatter};
use std::num::TryFromIntError;
use std::sync::PoisonError;

use config::ConfigError;
use serde::{Deserialize, Serialize};

use crate::storage::page::FrameId;

pub type Result<T> = std::result::Result<T, Error>;

// All except Internal are considered user-facing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    Internal(String),
    /// Splitting cannot separate colliding keys any further.
    CapacityExhausted,
    /// Frame id is outside the replacer's frame range.
    InvalidFrame(FrameId),
    /// Frame has no recorded access history.
    NotTracked(FrameId),
    /// Frame is pinned and must not leave the replacer.
    NotEvictable(FrameId),
}

impl Error {
    pub fn internal<E: ToString>(msg: E) -> Error {
        Error::Internal(msg.to_string())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(s) => write!(f, "{}", s),
            Error::CapacityExhausted => write!(f, "hash table capacity exhausted"),
            Error::InvalidFrame(id) => write!(f, "invalid frame id {}", id),
            Error::NotTracked(id) => write!(f, "frame {} has no access history", id),
            Error::NotEvictable(id) => write!(f, "frame {} is not evictable", id),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::internal(err)
    }
}

impl From<TryFromIntError> for Error {
    fn from(err: TryFromIntError) -> Self {
        Error::internal(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::internal(err)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(err: PoisonError<T>) -> Self {
        Error::internal(err)
    }
}
