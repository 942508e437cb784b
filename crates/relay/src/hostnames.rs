//! Hostname layout of the edge node
//!
//! Relay hostnames are `<subdomain>.<username>.<base_host>`. The API and Web
//! hostnames are reserved and never handed to a relay.

/// Request path prefix used by ACME HTTP-01 domain validation
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Port tag for sockets accepted on the secure listener
pub const SECURE_PORT: u16 = 443;

/// Port tag for sockets accepted on the plain listener
pub const PLAIN_PORT: u16 = 80;

/// Lowercase letters, digits and inner hyphens, at most 63 bytes.
///
/// Subdomains and usernames must pass this so a relay hostname always has
/// exactly two labels in front of the base host.
pub fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// The hostnames the dispatchers compare against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hostnames {
    base_host: String,
    api_hostname: String,
    web_hostname: String,
}

impl Hostnames {
    /// Derive `api.<base>` and `www.<base>` from the base host
    pub fn new(base_host: impl Into<String>) -> Self {
        let base_host = base_host.into();
        Self {
            api_hostname: format!("api.{base_host}"),
            web_hostname: format!("www.{base_host}"),
            base_host,
        }
    }

    /// Use explicit API/Web hostnames where given
    pub fn with_overrides(
        base_host: impl Into<String>,
        api_hostname: Option<String>,
        web_hostname: Option<String>,
    ) -> Self {
        let derived = Self::new(base_host);
        Self {
            api_hostname: api_hostname.unwrap_or(derived.api_hostname),
            web_hostname: web_hostname.unwrap_or(derived.web_hostname),
            base_host: derived.base_host,
        }
    }

    pub fn base_host(&self) -> &str {
        &self.base_host
    }

    pub fn api_hostname(&self) -> &str {
        &self.api_hostname
    }

    pub fn web_hostname(&self) -> &str {
        &self.web_hostname
    }

    /// Compose the hostname a tunnel client claims
    pub fn relay_hostname(&self, subdomain: &str, username: &str) -> String {
        format!("{subdomain}.{username}.{}", self.base_host)
    }

    /// True for the API and Web hostnames
    pub fn is_internal(&self, hostname: &str) -> bool {
        hostname == self.api_hostname || hostname == self.web_hostname
    }
}
