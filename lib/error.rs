use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("block {block} of file {id} is missing")]
    MissingBlock { id: String, block: u64 },

    #[error("can't obtain lock: {0}")]
    LockObtainFailed(String),

    #[error("lock is not held or already released: {0}")]
    LockReleased(String),

    #[error("lock invalidated or held by another owner: {0}")]
    LockInvalidated(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("read past end of file: {0}")]
    Eof(String),

    #[error("already closed: {0}")]
    Closed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        use std::io::ErrorKind;
        match e {
            Error::Io(e) => e,
            Error::NotFound(_) => std::io::Error::new(ErrorKind::NotFound, e),
            Error::Eof(_) => std::io::Error::new(ErrorKind::UnexpectedEof, e),
            Error::OutOfBounds(_) => std::io::Error::new(ErrorKind::InvalidInput, e),
            e => std::io::Error::other(e),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Backend(e.to_string())
    }
}

#[cfg(feature = "cassandra")]
impl From<scylla::transport::errors::QueryError> for Error {
    fn from(e: scylla::transport::errors::QueryError) -> Self {
        Error::Backend(e.to_string())
    }
}

#[cfg(feature = "cassandra")]
impl From<scylla::transport::errors::NewSessionError> for Error {
    fn from(e: scylla::transport::errors::NewSessionError) -> Self {
        Error::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
