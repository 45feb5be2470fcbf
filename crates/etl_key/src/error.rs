use contracts::ContractError;
use thiserror::Error;

/// Key that does not decode to a provenance tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("empty segment in key '{key}'")]
    EmptySegment { key: String },

    #[error("unbalanced parentheses in key '{key}'")]
    Unbalanced { key: String },

    #[error("invalid id '{segment}' in key '{key}'")]
    InvalidId { key: String, segment: String },
}

impl KeyError {
    pub(crate) fn empty_segment(key: &str) -> Self {
        Self::EmptySegment {
            key: key.to_string(),
        }
    }

    pub(crate) fn unbalanced(key: &str) -> Self {
        Self::Unbalanced {
            key: key.to_string(),
        }
    }

    pub(crate) fn invalid_id(key: &str, segment: &str) -> Self {
        Self::InvalidId {
            key: key.to_string(),
            segment: segment.to_string(),
        }
    }

    /// Key that failed to decode
    pub fn key(&self) -> &str {
        match self {
            Self::EmptySegment { key } | Self::Unbalanced { key } | Self::InvalidId { key, .. } => {
                key
            }
        }
    }
}

impl From<KeyError> for ContractError {
    fn from(error: KeyError) -> Self {
        ContractError::key_format(error.key().to_string(), error.to_string())
    }
}
