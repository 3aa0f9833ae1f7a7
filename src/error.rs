use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("An analyzer handle is already registered")]
    AlreadyRegistered,

    #[error("Worker thread error: {0}")]
    Worker(#[from] std::io::Error),
}
