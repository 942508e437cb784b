//! Relay edge node configuration

use crate::credentials::{StaticUserDirectory, UserRecord};
use crate::hostnames::{Hostnames, is_dns_label};
use crate::listener::ListenerSettings;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use spacekit_core::{ValidateConfig, validators};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayServerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub hosts: HostsConfig,
    #[serde(default)]
    pub listeners: ListenersConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Users allowed to open relays
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub dns: DnsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsConfig {
    /// Relay hostnames are `<subdomain>.<username>.<base_host>`
    pub base_host: String,
    /// Defaults to `api.<base_host>`
    #[serde(default)]
    pub api_hostname: Option<String>,
    /// Defaults to `www.<base_host>`
    #[serde(default)]
    pub web_hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenersConfig {
    #[serde(default = "default_secure_bind")]
    pub secure_bind: SocketAddr,
    #[serde(default = "default_plain_bind")]
    pub plain_bind: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long a new connection may take to reveal its hostname
    #[serde(default = "default_sniff_timeout")]
    pub sniff_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Upper bound on a relay handshake; 0 disables the bound
    #[serde(default = "default_handshake_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub id: String,
    /// Argon2 PHC string, see `spacekit-relay hash-secret`
    pub secret_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DnsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: DnsProvider,
    #[serde(default)]
    pub cloudflare: CloudflareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DnsProvider {
    #[default]
    None,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CloudflareConfig {
    pub zone_id: Option<String>,
    pub api_token: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_secure_bind() -> SocketAddr {
    ([0, 0, 0, 0], 443).into()
}

fn default_plain_bind() -> SocketAddr {
    ([0, 0, 0, 0], 80).into()
}

fn default_max_connections() -> usize {
    1000
}

fn default_sniff_timeout() -> u64 {
    5
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("certs/fullchain.pem")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("certs/privkey.pem")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl Default for ListenersConfig {
    fn default() -> Self {
        Self {
            secure_bind: default_secure_bind(),
            plain_bind: default_plain_bind(),
            max_connections: default_max_connections(),
            sniff_timeout_secs: default_sniff_timeout(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_handshake_timeout(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            hosts: HostsConfig {
                base_host: "localhost".to_string(),
                api_hostname: None,
                web_hostname: None,
            },
            listeners: ListenersConfig::default(),
            handshake: HandshakeConfig::default(),
            tls: TlsConfig::default(),
            users: Vec::new(),
            dns: DnsConfig::default(),
        }
    }
}

impl RelayServerConfig {
    /// Load from the first config files found in the usual places, then the
    /// environment (`SPACEKIT__HOSTS__BASE_HOST=...`)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&RelayServerConfig::default())?);

        let config_paths = ["relay.toml", "config/relay.toml", "/etc/spacekit/relay.toml"];
        for path in &config_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(environment());
        builder.build()?.try_deserialize()
    }

    /// Load from a specific file; environment variables still override it
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Config::try_from(&RelayServerConfig::default())?)
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;
        config.try_deserialize()
    }

    pub fn hostnames(&self) -> Hostnames {
        Hostnames::with_overrides(
            self.hosts.base_host.clone(),
            self.hosts.api_hostname.clone(),
            self.hosts.web_hostname.clone(),
        )
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            max_connections: self.listeners.max_connections,
            sniff_timeout: Duration::from_secs(self.listeners.sniff_timeout_secs),
        }
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        match self.handshake.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn user_directory(&self) -> StaticUserDirectory {
        StaticUserDirectory::new(self.users.iter().map(|user| {
            (
                user.username.clone(),
                UserRecord {
                    id: user.id.clone(),
                    secret_hash: user.secret_hash.clone(),
                },
            )
        }))
    }
}

fn environment() -> Environment {
    Environment::with_prefix("SPACEKIT")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl ValidateConfig for RelayServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.server.log_level.as_str()) {
            return Err(ConfigError::Message(format!(
                "server.log_level must be one of: {valid_log_levels:?}"
            )));
        }

        validators::validate_hostname(&self.hosts.base_host, "hosts.base_host")?;
        let hostnames = self.hostnames();
        validators::validate_hostname(hostnames.api_hostname(), "hosts.api_hostname")?;
        validators::validate_hostname(hostnames.web_hostname(), "hosts.web_hostname")?;
        if hostnames.api_hostname() == hostnames.web_hostname() {
            return Err(ConfigError::Message(
                "hosts.api_hostname and hosts.web_hostname must differ".to_string(),
            ));
        }

        validators::validate_port(self.listeners.secure_bind.port(), "listeners.secure_bind")?;
        validators::validate_port(self.listeners.plain_bind.port(), "listeners.plain_bind")?;
        validators::validate_range(
            self.listeners.max_connections,
            1,
            100_000,
            "listeners.max_connections",
        )?;
        validators::validate_range(
            self.listeners.sniff_timeout_secs,
            1,
            300,
            "listeners.sniff_timeout_secs",
        )?;
        validators::validate_range(self.handshake.timeout_secs, 0, 3600, "handshake.timeout_secs")?;

        for (i, user) in self.users.iter().enumerate() {
            validators::validate_not_empty(&user.username, &format!("users[{i}].username"))?;
            if !is_dns_label(&user.username) {
                return Err(ConfigError::Message(format!(
                    "users[{i}].username: '{}' must be a lowercase DNS label",
                    user.username
                )));
            }
            validators::validate_not_empty(&user.id, &format!("users[{i}].id"))?;
            validators::validate_not_empty(&user.secret_hash, &format!("users[{i}].secret_hash"))?;
        }
        let mut usernames: Vec<_> = self.users.iter().map(|u| u.username.as_str()).collect();
        usernames.sort_unstable();
        if let Some(pair) = usernames.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Message(format!(
                "users: duplicate username {}",
                pair[0]
            )));
        }

        if self.dns.enabled {
            match &self.dns.provider {
                DnsProvider::None => {
                    return Err(ConfigError::Message(
                        "dns.provider must be set when DNS is enabled".to_string(),
                    ));
                }
                DnsProvider::Cloudflare => {
                    if self.dns.cloudflare.zone_id.is_none() {
                        return Err(ConfigError::Message(
                            "dns.cloudflare.zone_id is required when using Cloudflare provider"
                                .to_string(),
                        ));
                    }
                    if self.dns.cloudflare.api_token.is_none() {
                        return Err(ConfigError::Message(
                            "dns.cloudflare.api_token is required when using Cloudflare provider"
                                .to_string(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = RelayServerConfig::default();
        assert_eq!(config.listeners.secure_bind.port(), 443);
        assert_eq!(config.listeners.plain_bind.port(), 80);
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[hosts]
base_host = "spacekit.io"

[listeners]
secure_bind = "127.0.0.1:8443"
plain_bind = "127.0.0.1:8080"

[handshake]
timeout_secs = 0

[[users]]
username = "alice"
id = "42"
secret_hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA"
"#,
        );

        let config = RelayServerConfig::load_from_file(file.path()).unwrap();
        assert!(config.validate().is_ok());

        let hostnames = config.hostnames();
        assert_eq!(hostnames.base_host(), "spacekit.io");
        assert_eq!(hostnames.api_hostname(), "api.spacekit.io");
        assert_eq!(hostnames.web_hostname(), "www.spacekit.io");
        assert_eq!(config.listeners.secure_bind.port(), 8443);
        assert_eq!(config.handshake_timeout(), None);
        assert_eq!(config.user_directory().len(), 1);
        assert_eq!(config.listeners.max_connections, 1000);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = RelayServerConfig::default();
        config.server.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_api_and_web_host_rejected() {
        let mut config = RelayServerConfig::default();
        config.hosts.api_hostname = Some("www.localhost".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_usernames_rejected() {
        let mut config = RelayServerConfig::default();
        let user = UserConfig {
            username: "alice".into(),
            id: "1".into(),
            secret_hash: "h".into(),
        };
        config.users = vec![user.clone(), user];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_username_must_be_dns_label() {
        let mut config = RelayServerConfig::default();
        let user = |username: &str| UserConfig {
            username: username.into(),
            id: "1".into(),
            secret_hash: "h".into(),
        };

        config.users = vec![user("alice")];
        assert!(config.validate().is_ok());

        for bad in ["Alice", "bob.smith", "-bob"] {
            config.users = vec![user(bad)];
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_dns_requires_provider_settings() {
        let mut config = RelayServerConfig::default();
        config.dns.enabled = true;
        assert!(config.validate().is_err());

        config.dns.provider = DnsProvider::Cloudflare;
        assert!(config.validate().is_err());

        config.dns.cloudflare.zone_id = Some("zone".into());
        config.dns.cloudflare.api_token = Some("token".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_override() {
        let config = RelayServerConfig::default();
        assert!(
            config
                .validate_override("listeners.max_connections", serde_json::json!(0))
                .is_err()
        );
        assert!(
            config
                .validate_override("listeners.max_connections", serde_json::json!(50))
                .is_ok()
        );
    }
}
