pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    General(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("unknown codec: {name}")]
    UnknownCodec { name: String },
    #[error("codec {name} already registered as {kind}")]
    DuplicateCodec { name: String, kind: &'static str },
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("degenerate transform (determinant {determinant})")]
    DegenerateTransform { determinant: f64 },
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }
}
