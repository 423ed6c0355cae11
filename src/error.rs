//! Error types and handling for buffer ports

/// Result type alias for port operations
pub type Result<T> = std::result::Result<T, PortError>;

/// Errors raised by registries, ports, tunnels and allocators
///
/// `InvalidArgument` and `State` are always detected before any state is
/// touched. `Resource` is surfaced to the owning component, which decides
/// whether the failure is fatal; nothing in this crate retries.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// Misuse: bad index, foreign buffer, undersized buffer, bad definition
    #[error("Invalid argument: {parameter} - {message}")]
    InvalidArgument { parameter: String, message: String },

    /// Allocation or registry growth failure
    #[error("Resource error: {message}")]
    Resource { message: String },

    /// Operation not valid in the current lifecycle or tunnel state
    #[error("State error: {message}")]
    State { message: String },
}

impl PortError {
    /// Create an invalid argument error
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an out-of-range index error
    pub fn index_out_of_range(parameter: impl Into<String>, index: usize, len: usize) -> Self {
        Self::invalid_argument(parameter, format!("index {} out of range (len {})", index, len))
    }

    /// Create a resource error
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// True for `InvalidArgument`
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// True for `Resource`
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }

    /// True for `State`
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }
}

impl From<std::collections::TryReserveError> for PortError {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::resource(format!("registry growth failed: {}", err))
    }
}
