use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown property id: {0}")]
    UnknownProperty(i32),

    #[error("Unknown discovery mode: {0}")]
    UnknownDiscoveryMode(i32),

    #[error("Unknown link type: {0}")]
    UnknownLinkType(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_message() {
        let err = Error::InvalidStateTransition {
            from: "Uninitialized".to_string(),
            to: "Ready".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Uninitialized to Ready"
        );
    }

    #[test]
    fn test_unknown_property_message() {
        assert_eq!(
            Error::UnknownProperty(42).to_string(),
            "Unknown property id: 42"
        );
    }
}
