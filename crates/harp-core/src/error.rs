use thiserror::Error;

pub type HarpResult<T> = Result<T, HarpError>;

/// Errors surfaced by the harp core.
///
/// Messages name algorithms, package paths, field names and sizes. They never
/// carry key bytes, plaintext, or ciphertext.
#[derive(Debug, Error)]
pub enum HarpError {
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("unsupported primitive: {0}")]
    UnsupportedPrimitive(String),

    #[error("unsupported container version: {0}")]
    UnsupportedContainerVersion(String),

    #[error("unsupported identity version: {0}")]
    UnsupportedVersion(String),

    #[error("not permitted in FIPS mode: {0}")]
    FipsNotPermitted(String),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("invalid master key: {0}")]
    InvalidMasterKey(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("no provided identity matches any container recipient")]
    NoMatchingRecipient,

    #[error("key alias '{alias}' referenced by package '{package}' is not resolvable")]
    UnresolvedAlias { alias: String, package: String },

    #[error("size limit exceeded: {what} is {actual} bytes (limit {limit})")]
    SizeLimitExceeded {
        what: &'static str,
        actual: u64,
        limit: u64,
    },

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat classification of [`HarpError`], used by callers that only need the
/// failure family (exit codes, metrics labels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputValidation,
    UnsupportedPrimitive,
    UnsupportedContainerVersion,
    UnsupportedVersion,
    FipsNotPermitted,
    InvalidKeyMaterial,
    AuthenticationFailed,
    NoMatchingRecipient,
    UnresolvedAlias,
    SizeLimitExceeded,
    IoFailure,
}

impl HarpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarpError::InputValidation(_) | HarpError::Config(_) => ErrorKind::InputValidation,
            HarpError::UnsupportedPrimitive(_) => ErrorKind::UnsupportedPrimitive,
            HarpError::UnsupportedContainerVersion(_) | HarpError::MalformedContainer(_) => {
                ErrorKind::UnsupportedContainerVersion
            }
            HarpError::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            HarpError::FipsNotPermitted(_) => ErrorKind::FipsNotPermitted,
            HarpError::InvalidKeyMaterial(_) | HarpError::InvalidMasterKey(_) => {
                ErrorKind::InvalidKeyMaterial
            }
            HarpError::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            HarpError::NoMatchingRecipient => ErrorKind::NoMatchingRecipient,
            HarpError::UnresolvedAlias { .. } => ErrorKind::UnresolvedAlias,
            HarpError::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            HarpError::Io(_) => ErrorKind::IoFailure,
        }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        HarpError::InputValidation(msg.into())
    }

    pub fn key_material(msg: impl Into<String>) -> Self {
        HarpError::InvalidKeyMaterial(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        HarpError::AuthenticationFailed(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        HarpError::MalformedContainer(msg.into())
    }

    /// Fails with [`HarpError::SizeLimitExceeded`] when `actual > limit`.
    pub fn check_size(what: &'static str, actual: u64, limit: u64) -> HarpResult<()> {
        if actual > limit {
            return Err(HarpError::SizeLimitExceeded {
                what,
                actual,
                limit,
            });
        }
        Ok(())
    }
}
