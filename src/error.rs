use thiserror::Error;

// =============================================================================
// Error taxonomy shared by the three coordinators
// =============================================================================

/// CoordinationError: every failure a blocking operation can surface.
///
/// None of these are fatal to the process. A turned-away customer is not an
/// error at all; `WaitingRoom::try_enter` reports it as `Ok(false)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("invalid configuration for '{parameter}': {reason}")]
    InvalidConfiguration {
        parameter: &'static str,
        reason: String,
    },

    #[error("operation cancelled")]
    OperationCancelled,

    #[error("queue is closed for adding")]
    QueueClosed,

    #[error("queue is closed and fully drained")]
    QueueDrained,
}

impl CoordinationError {
    pub fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            parameter,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::OperationCancelled)
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_configuration_names_the_parameter() {
        let err = CoordinationError::invalid("capacity", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "invalid configuration for 'capacity': must be greater than zero"
        );
        assert!(!err.is_cancelled());
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(CoordinationError::OperationCancelled.is_cancelled());
        assert_ne!(CoordinationError::QueueClosed, CoordinationError::QueueDrained);
    }
}
