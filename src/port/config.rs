//! Port definition: direction, buffer counts and buffer size

use serde::{Deserialize, Serialize};

use crate::error::{PortError, Result};

/// Direction of data through a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Buffers flow into the component
    Input,
    /// Buffers flow out of the component
    Output,
}

impl Direction {
    /// Get a human-readable name for the direction
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Declared buffer requirements of a port
///
/// `buffer_count_min` is fixed by the component. `buffer_count_actual` is the
/// number of buffers that must be registered before the port counts as
/// populated and may be renegotiated while the port has no buffers.
/// `buffer_size` is the minimum size of each buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDefinition {
    /// Direction of the port
    pub direction: Direction,
    /// Minimum number of buffers the port requires
    pub buffer_count_min: usize,
    /// Number of buffers required before the port is populated
    pub buffer_count_actual: usize,
    /// Minimum size of each buffer in bytes
    pub buffer_size: usize,
    /// Initial registry capacity; growth past it is allowed
    pub capacity_hint: usize,
}

impl Default for PortDefinition {
    fn default() -> Self {
        Self {
            direction: Direction::Input,
            buffer_count_min: 1,
            buffer_count_actual: 1,
            buffer_size: 4096,
            capacity_hint: 1,
        }
    }
}

impl PortDefinition {
    /// Create a definition with the given counts and buffer size
    pub fn new(
        direction: Direction,
        buffer_count_min: usize,
        buffer_count_actual: usize,
        buffer_size: usize,
    ) -> Self {
        Self {
            direction,
            buffer_count_min,
            buffer_count_actual,
            buffer_size,
            capacity_hint: buffer_count_actual,
        }
    }

    /// Set direction
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set minimum buffer count
    pub fn with_buffer_count_min(mut self, count: usize) -> Self {
        self.buffer_count_min = count;
        self
    }

    /// Set actual buffer count
    pub fn with_buffer_count_actual(mut self, count: usize) -> Self {
        self.buffer_count_actual = count;
        self
    }

    /// Set buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set registry capacity hint
    pub fn with_capacity_hint(mut self, hint: usize) -> Self {
        self.capacity_hint = hint;
        self
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<()> {
        if self.buffer_count_min == 0 {
            return Err(PortError::invalid_argument(
                "buffer_count_min",
                "Minimum buffer count cannot be zero",
            ));
        }

        if self.buffer_count_actual < self.buffer_count_min {
            return Err(PortError::invalid_argument(
                "buffer_count_actual",
                format!(
                    "Actual buffer count {} is below the minimum {}",
                    self.buffer_count_actual, self.buffer_count_min
                ),
            ));
        }

        if self.buffer_size == 0 {
            return Err(PortError::invalid_argument(
                "buffer_size",
                "Buffer size cannot be zero",
            ));
        }

        Ok(())
    }

    /// Total bytes needed to populate the port
    pub fn total_memory_required(&self) -> usize {
        self.buffer_size.saturating_mul(self.buffer_count_actual)
    }
}

/// Builder pattern for port definitions
pub struct PortDefinitionBuilder {
    definition: PortDefinition,
}

impl PortDefinitionBuilder {
    /// Create a new builder
    pub fn new(direction: Direction) -> Self {
        Self {
            definition: PortDefinition::default().with_direction(direction),
        }
    }

    /// Set minimum buffer count
    pub fn buffer_count_min(mut self, count: usize) -> Self {
        self.definition.buffer_count_min = count;
        self
    }

    /// Set actual buffer count
    pub fn buffer_count_actual(mut self, count: usize) -> Self {
        self.definition.buffer_count_actual = count;
        self
    }

    /// Set buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.definition.buffer_size = size;
        self
    }

    /// Set registry capacity hint
    pub fn capacity_hint(mut self, hint: usize) -> Self {
        self.definition.capacity_hint = hint;
        self
    }

    /// Build the definition; the capacity hint defaults to the actual count
    pub fn build(mut self) -> Result<PortDefinition> {
        self.definition.capacity_hint = self
            .definition
            .capacity_hint
            .max(self.definition.buffer_count_actual);
        self.definition.validate()?;
        Ok(self.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_hint_to_actual() {
        let def = PortDefinitionBuilder::new(Direction::Output)
            .buffer_count_min(2)
            .buffer_count_actual(6)
            .buffer_size(1 << 16)
            .build()
            .unwrap();
        assert_eq!(def.capacity_hint, 6);
        assert_eq!(def.direction, Direction::Output);
        assert_eq!(def.total_memory_required(), 6 << 16);
    }

    #[test]
    fn test_validation() {
        assert!(PortDefinition::new(Direction::Input, 0, 1, 16).validate().is_err());
        assert!(PortDefinition::new(Direction::Input, 3, 2, 16).validate().is_err());
        assert!(PortDefinition::new(Direction::Input, 1, 2, 0).validate().is_err());
        assert!(PortDefinition::new(Direction::Input, 2, 2, 16).validate().is_ok());
        assert!(PortDefinitionBuilder::new(Direction::Input)
            .buffer_count_min(4)
            .buffer_count_actual(1)
            .build()
            .is_err());
    }
}
