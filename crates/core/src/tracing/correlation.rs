//! Per-connection identifiers for log correlation

use std::fmt;

/// Random identifier attached to every accepted connection's span so that
/// all log lines for one socket can be grepped together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId([u8; 8]);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Raw bytes of the identifier
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_16_hex_chars() {
        let id = ConnectionId::new();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 16);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ids_differ() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
