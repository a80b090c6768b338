/// Indicates that no registered codec matches a declared content type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no codec registered for content type {content_type}")]
pub struct UnsupportedContentType {
    pub content_type: String,
}

/// Indicates that a codec was registered twice for the same concrete content type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("a codec for {content_type} is already registered")]
pub struct CodecAlreadyRegistered {
    pub content_type: String,
}

/// Indicates that a content type given at registration is not a concrete `type/subtype` pair.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{content_type} is not a concrete media type")]
pub struct InvalidMediaType {
    pub content_type: String,
}

/// A value could not be converted to or from bytes by a codec.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CodecError {
    pub message: String,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors returned by [`CodecRegistry::register`](super::CodecRegistry::register).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    AlreadyRegistered(#[from] CodecAlreadyRegistered),

    #[error(transparent)]
    InvalidMediaType(#[from] InvalidMediaType),
}
