use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("code reference for this build job does not have any repo")]
    MissingCodeReference,
}

pub type Result<T> = std::result::Result<T, CoreError>;
