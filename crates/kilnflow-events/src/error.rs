use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("store backend error: {0}")]
    Store(String),
}

impl From<StoreError> for EventError {
    fn from(error: StoreError) -> Self {
        EventError::Store(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EventError>;
