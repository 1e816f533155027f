use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("file must have an extension")]
    MissingExtension,
    #[error("file extension `{extension}` is not allowed")]
    ExtensionNotAllowed { extension: String },
    #[error("uploaded image is empty")]
    EmptyPayload,
}

impl DomainError {
    pub fn extension_not_allowed(extension: impl Into<String>) -> Self {
        Self::ExtensionNotAllowed {
            extension: extension.into(),
        }
    }
}
