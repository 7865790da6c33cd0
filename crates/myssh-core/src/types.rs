use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{MysshError, Result};

/// Standard SSH port, used when neither a profile nor the command line names one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A stored connection profile
#[derive(Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host: host.into(),
            port,
            user: user.into(),
            password: None,
            key_path: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .finish()
    }
}

/// Partial profile modification; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.user.is_none()
            && self.password.is_none()
            && self.key_path.is_none()
    }

    pub fn apply(self, profile: &mut Profile) {
        if let Some(host) = self.host {
            profile.host = host;
        }
        if let Some(port) = self.port {
            profile.port = port;
        }
        if let Some(user) = self.user {
            profile.user = user;
        }
        if let Some(password) = self.password {
            profile.password = Some(password);
        }
        if let Some(key_path) = self.key_path {
            profile.key_path = Some(key_path);
        }
        profile.updated_at = Utc::now();
    }
}

/// Connection parameters given explicitly on the command line.
///
/// Each field present here wins over the same field of a named profile.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
}

impl ConnectionOverrides {
    /// Merge these overrides with an optional profile into a complete connection.
    ///
    /// # Errors
    ///
    /// Fails when host or user end up missing, or when neither a password
    /// nor a key path is available.
    pub fn resolve(self, profile: Option<&Profile>) -> Result<ResolvedConnection> {
        let host = non_empty(self.host)
            .or_else(|| profile.map(|p| p.host.clone()).filter(|h| !h.is_empty()))
            .ok_or_else(|| MysshError::IncompleteConnection("host is required".into()))?;

        let user = non_empty(self.user)
            .or_else(|| profile.map(|p| p.user.clone()).filter(|u| !u.is_empty()))
            .ok_or_else(|| MysshError::IncompleteConnection("user is required".into()))?;

        let port = self
            .port
            .filter(|p| *p != 0)
            .or_else(|| profile.map(|p| p.port).filter(|p| *p != 0))
            .unwrap_or(DEFAULT_SSH_PORT);

        let credentials = Credentials {
            password: non_empty(self.password)
                .or_else(|| profile.and_then(|p| non_empty(p.password.clone()))),
            key_path: self
                .key_path
                .filter(|k| !k.as_os_str().is_empty())
                .or_else(|| profile.and_then(|p| p.key_path.clone()))
                .filter(|k| !k.as_os_str().is_empty()),
        };

        if credentials.is_empty() {
            return Err(MysshError::NoCredential(format!("{}@{}", user, host)));
        }

        Ok(ResolvedConnection {
            host,
            port,
            user,
            credentials,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Secret material used to authenticate. Key auth is attempted before the password.
#[derive(Clone, Default)]
pub struct Credentials {
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.key_path.is_none()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .finish()
    }
}

/// Fully resolved connection target
#[derive(Debug, Clone)]
pub struct ResolvedConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credentials: Credentials,
}

impl ResolvedConnection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ResolvedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Direction of a single-file copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// One file copy, consumed by a single transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub direction: Direction,
    pub local_path: PathBuf,
    pub remote_path: String,
}

impl TransferRequest {
    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            direction: Direction::Upload,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }

    pub fn download(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            direction: Direction::Download,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }
}

/// How the client treats the server's host key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Only hosts with a matching known_hosts entry are accepted
    #[default]
    Strict,
    /// Unknown hosts are recorded on first use; changed keys are rejected
    AcceptNew,
    /// Every host key is accepted
    Insecure,
}

impl std::fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostKeyPolicy::Strict => write!(f, "strict"),
            HostKeyPolicy::AcceptNew => write!(f, "accept-new"),
            HostKeyPolicy::Insecure => write!(f, "insecure"),
        }
    }
}

impl std::str::FromStr for HostKeyPolicy {
    type Err = MysshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(HostKeyPolicy::Strict),
            "accept-new" => Ok(HostKeyPolicy::AcceptNew),
            "insecure" => Ok(HostKeyPolicy::Insecure),
            other => Err(MysshError::Parse(format!(
                "invalid host key policy '{}': expected strict, accept-new or insecure",
                other
            ))),
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = MysshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(MysshError::Parse(format!(
                "invalid log format '{}': expected text or json",
                other
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// SSH session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts file; the user's `~/.ssh/known_hosts` when unset
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub inactivity_timeout_secs: u64,
    /// Terminal type requested for interactive sessions
    pub term: String,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            host_key_policy: HostKeyPolicy::Strict,
            known_hosts: None,
            connect_timeout_secs: 30,
            inactivity_timeout_secs: 300,
            term: "xterm".to_string(),
        }
    }
}

/// SCP transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Octal permission string announced in upload headers
    pub file_mode: String,
    /// Upper bound on each acknowledgement or header read
    pub ack_timeout_secs: Option<u64>,
    /// Write downloads to a `.part` sibling and rename on success
    pub atomic_download: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            file_mode: "0644".to_string(),
            ack_timeout_secs: None,
            atomic_download: false,
        }
    }
}

impl TransferSettings {
    pub fn mode(&self) -> Result<u32> {
        parse_file_mode(&self.file_mode)
    }
}

/// Parse an octal permission string such as `0644` or `755`.
pub fn parse_file_mode(value: &str) -> Result<u32> {
    let valid = (3..=4).contains(&value.len()) && value.bytes().all(|b| (b'0'..=b'7').contains(&b));
    if !valid {
        return Err(MysshError::Parse(format!(
            "invalid file mode '{}': expected 3 or 4 octal digits",
            value
        )));
    }
    u32::from_str_radix(value, 8).map_err(|e| MysshError::Parse(e.to_string()))
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default)]
    pub transfer: TransferSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            ssh: SshSettings::default(),
            transfer: TransferSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Directory holding the configuration file and the profile database
    pub fn config_dir() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("myssh")
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| MysshError::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.transfer
            .mode()
            .map_err(|e| MysshError::InvalidConfig(format!("transfer.file_mode: {}", e)))?;

        if self.ssh.connect_timeout_secs == 0 {
            return Err(MysshError::InvalidConfig(
                "ssh.connect_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.transfer.ack_timeout_secs == Some(0) {
            return Err(MysshError::InvalidConfig(
                "transfer.ack_timeout_secs must be greater than zero when set".to_string(),
            ));
        }

        if self.ssh.term.is_empty() {
            return Err(MysshError::InvalidConfig("ssh.term must not be empty".to_string()));
        }

        Ok(())
    }
}

fn default_database_path() -> PathBuf {
    ClientConfig::config_dir().join("myssh.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_profile() -> Profile {
        let mut profile = Profile::new("prod", "prod.example.com", 2200, "deploy");
        profile.key_path = Some(PathBuf::from("/home/deploy/.ssh/id_ed25519"));
        profile
    }

    #[test]
    fn test_overrides_alone_resolve() {
        let overrides = ConnectionOverrides {
            host: Some("example.com".into()),
            user: Some("alice".into()),
            password: Some("secret".into()),
            ..Default::default()
        };

        let resolved = overrides.resolve(None).unwrap();
        assert_eq!(resolved.host, "example.com");
        assert_eq!(resolved.user, "alice");
        assert_eq!(resolved.port, DEFAULT_SSH_PORT);
        assert_eq!(resolved.credentials.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_overrides_without_host_fail() {
        let overrides = ConnectionOverrides {
            user: Some("alice".into()),
            password: Some("secret".into()),
            ..Default::default()
        };

        let err = overrides.resolve(None).unwrap_err();
        assert!(matches!(err, MysshError::IncompleteConnection(_)));
    }

    #[test]
    fn test_overrides_without_user_fail() {
        let overrides = ConnectionOverrides {
            host: Some("example.com".into()),
            password: Some("secret".into()),
            ..Default::default()
        };

        assert!(matches!(
            overrides.resolve(None),
            Err(MysshError::IncompleteConnection(_))
        ));
    }

    #[test]
    fn test_profile_values_used_when_no_overrides() {
        let profile = stored_profile();
        let resolved = ConnectionOverrides::default().resolve(Some(&profile)).unwrap();

        assert_eq!(resolved.host, "prod.example.com");
        assert_eq!(resolved.port, 2200);
        assert_eq!(resolved.user, "deploy");
        assert_eq!(
            resolved.credentials.key_path,
            Some(PathBuf::from("/home/deploy/.ssh/id_ed25519"))
        );
    }

    #[test]
    fn test_overrides_win_field_by_field() {
        let profile = stored_profile();
        let overrides = ConnectionOverrides {
            port: Some(2222),
            password: Some("hunter2".into()),
            ..Default::default()
        };

        let resolved = overrides.resolve(Some(&profile)).unwrap();
        assert_eq!(resolved.host, "prod.example.com");
        assert_eq!(resolved.port, 2222);
        assert_eq!(resolved.user, "deploy");
        assert_eq!(resolved.credentials.password.as_deref(), Some("hunter2"));
        // The profile's key is still available as the first method
        assert!(resolved.credentials.key_path.is_some());
    }

    #[test]
    fn test_empty_override_strings_are_ignored() {
        let profile = stored_profile();
        let overrides = ConnectionOverrides {
            host: Some(String::new()),
            user: Some(String::new()),
            ..Default::default()
        };

        let resolved = overrides.resolve(Some(&profile)).unwrap();
        assert_eq!(resolved.host, "prod.example.com");
        assert_eq!(resolved.user, "deploy");
    }

    #[test]
    fn test_missing_credentials_fail() {
        let overrides = ConnectionOverrides {
            host: Some("example.com".into()),
            user: Some("alice".into()),
            ..Default::default()
        };

        assert!(matches!(
            overrides.resolve(None),
            Err(MysshError::NoCredential(_))
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let credentials = Credentials {
            password: Some("topsecret".into()),
            key_path: None,
        };
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_parse_file_mode() {
        assert_eq!(parse_file_mode("0644").unwrap(), 0o644);
        assert_eq!(parse_file_mode("755").unwrap(), 0o755);
        assert_eq!(parse_file_mode("7777").unwrap(), 0o7777);
        assert!(parse_file_mode("0648").is_err());
        assert!(parse_file_mode("64").is_err());
        assert!(parse_file_mode("00644").is_err());
        assert!(parse_file_mode("rw-r").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ssh.host_key_policy, HostKeyPolicy::Strict);
        assert_eq!(config.transfer.mode().unwrap(), 0o644);
    }

    #[test]
    fn test_config_from_toml() {
        let config = ClientConfig::from_toml(
            r#"
            database_path = "/tmp/profiles.db"

            [ssh]
            host_key_policy = "accept-new"
            connect_timeout_secs = 10

            [transfer]
            file_mode = "0600"
            atomic_download = true

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/profiles.db"));
        assert_eq!(config.ssh.host_key_policy, HostKeyPolicy::AcceptNew);
        assert_eq!(config.ssh.connect_timeout_secs, 10);
        assert_eq!(config.ssh.term, "xterm");
        assert_eq!(config.transfer.mode().unwrap(), 0o600);
        assert!(config.transfer.atomic_download);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_rejects_bad_mode() {
        let result = ClientConfig::from_toml("[transfer]\nfile_mode = \"999\"\n");
        assert!(matches!(result, Err(MysshError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_zero_connect_timeout() {
        let mut config = ClientConfig::default();
        config.ssh.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_host_key_policy_from_str() {
        assert_eq!("strict".parse::<HostKeyPolicy>().unwrap(), HostKeyPolicy::Strict);
        assert_eq!("Accept-New".parse::<HostKeyPolicy>().unwrap(), HostKeyPolicy::AcceptNew);
        assert_eq!("insecure".parse::<HostKeyPolicy>().unwrap(), HostKeyPolicy::Insecure);
        assert!("yolo".parse::<HostKeyPolicy>().is_err());
    }

    #[test]
    fn test_profile_update_applies_only_present_fields() {
        let mut profile = stored_profile();
        let update = ProfileUpdate {
            port: Some(22),
            ..Default::default()
        };
        assert!(!update.is_empty());
        update.apply(&mut profile);

        assert_eq!(profile.port, 22);
        assert_eq!(profile.host, "prod.example.com");
        assert_eq!(profile.user, "deploy");
    }
}
