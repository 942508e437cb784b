//! Configuration validation support

use config::ConfigError;
use serde::{Deserialize, Serialize};

/// Trait for validating configuration values
pub trait ValidateConfig: Serialize + for<'de> Deserialize<'de> {
    /// Validate the configuration
    ///
    /// Returns Ok(()) if valid, or an error describing what's wrong
    fn validate(&self) -> Result<(), ConfigError>;

    /// Validate the configuration as it would look after overriding a single
    /// dotted path (e.g. `listeners.max_connections`) with `value`.
    fn validate_override(&self, path: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        let mut current = serde_json::to_value(self)
            .map_err(|e| ConfigError::Message(format!("Failed to serialize config: {e}")))?;

        if path.is_empty() {
            current = value;
        } else {
            set_path(&mut current, path, value)?;
        }

        let updated: Self = serde_json::from_value(current)
            .map_err(|e| ConfigError::Message(format!("Invalid config after override: {e}")))?;

        updated.validate()
    }
}

fn set_path(
    target: &mut serde_json::Value,
    path: &str,
    value: serde_json::Value,
) -> Result<(), ConfigError> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = target;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            current = current
                .as_object_mut()
                .and_then(|obj| obj.get_mut(segment))
                .ok_or_else(|| ConfigError::Message(format!("Path '{path}' not found")))?;
        }
    }

    match current.as_object_mut() {
        Some(obj) => {
            obj.insert(leaf.to_string(), value);
            Ok(())
        }
        None => Err(ConfigError::Message(format!(
            "Cannot set '{leaf}' on non-object in '{path}'"
        ))),
    }
}

/// Common validation helpers
pub mod validators {
    use config::ConfigError;

    /// Validate that a port number is valid (1-65535)
    pub fn validate_port(port: u16, field: &str) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::Message(format!(
                "{field}: port must be between 1 and 65535"
            )));
        }
        Ok(())
    }

    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::Message(format!("{field}: cannot be empty")));
        }
        Ok(())
    }

    /// Validate a DNS hostname: dot-separated labels of ASCII alphanumerics and
    /// hyphens, no empty labels, at most 253 characters.
    pub fn validate_hostname(value: &str, field: &str) -> Result<(), ConfigError> {
        validate_not_empty(value, field)?;
        if value.len() > 253 {
            return Err(ConfigError::Message(format!("{field}: hostname too long")));
        }
        let valid = value.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
        if !valid {
            return Err(ConfigError::Message(format!(
                "{field}: '{value}' is not a valid hostname"
            )));
        }
        Ok(())
    }

    /// Validate that a value is within range
    pub fn validate_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<(), ConfigError> {
        if value < min || value > max {
            return Err(ConfigError::Message(format!(
                "{field}: must be between {min} and {max}"
            )));
        }
        Ok(())
    }
}
