//! Resolution error taxonomy.

use bridge_traits::ExtractionError;
use thiserror::Error;

/// Why a query could not be turned into a playable track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// No strategy produced a usable candidate.
    #[error("No results found: {0}")]
    NotFound(String),

    /// Private, age-restricted or region-locked.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The upstream is actively blocking automated access.
    #[error("Throttled by upstream: {0}")]
    Throttled(String),

    /// DNS, connection or timeout failure that outlived the same-strategy
    /// retries.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl ResolutionError {
    /// Failures worth another attempt later; a missing or denied item is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolutionError::Throttled(_) | ResolutionError::TransientNetwork(_)
        )
    }

    /// Ordering used to pick the error reported after every strategy failed.
    /// Higher is more specific.
    pub(crate) fn specificity(&self) -> u8 {
        match self {
            ResolutionError::AccessDenied(_) => 4,
            ResolutionError::Throttled(_) => 3,
            ResolutionError::TransientNetwork(_) => 2,
            ResolutionError::NotFound(_) => 1,
            ResolutionError::InvalidQuery(_) => 0,
        }
    }
}

impl From<ExtractionError> for ResolutionError {
    fn from(error: ExtractionError) -> Self {
        match error {
            ExtractionError::Network(msg) => ResolutionError::TransientNetwork(msg),
            ExtractionError::AccessDenied(msg) => ResolutionError::AccessDenied(msg),
            ExtractionError::Blocked(msg) => ResolutionError::Throttled(msg),
            ExtractionError::Unavailable(msg)
            | ExtractionError::Malformed(msg)
            | ExtractionError::Failed(msg) => ResolutionError::NotFound(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_error_mapping() {
        assert_eq!(
            ResolutionError::from(ExtractionError::Blocked("bot".into())),
            ResolutionError::Throttled("bot".into())
        );
        assert_eq!(
            ResolutionError::from(ExtractionError::Network("dns".into())),
            ResolutionError::TransientNetwork("dns".into())
        );
        assert!(matches!(
            ResolutionError::from(ExtractionError::Unavailable("gone".into())),
            ResolutionError::NotFound(_)
        ));
    }

    #[test]
    fn test_specificity_order() {
        let denied = ResolutionError::AccessDenied(String::new());
        let throttled = ResolutionError::Throttled(String::new());
        let network = ResolutionError::TransientNetwork(String::new());
        let missing = ResolutionError::NotFound(String::new());

        assert!(denied.specificity() > throttled.specificity());
        assert!(throttled.specificity() > network.specificity());
        assert!(network.specificity() > missing.specificity());
    }

    #[test]
    fn test_retryable() {
        assert!(ResolutionError::Throttled(String::new()).is_retryable());
        assert!(!ResolutionError::AccessDenied(String::new()).is_retryable());
    }
}
