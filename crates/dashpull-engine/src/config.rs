//! Engine configuration.
//!
//! The configuration lives in an INI file with `SETTINGS`, `LOGIN`,
//! `INTERVAL` and `SERVER` sections. It is resolved into an immutable
//! [`EngineConfig`] snapshot at every decision point, so edits to the file
//! take effect on the next run rather than the current one.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use dashpull_core::BusyWindow;
use ini::{Ini, ParseOption};
use tracing::{debug, warn};

use crate::error::EngineError;

/// Dashboard origin used when `SETTINGS.base_url` is absent.
pub const DEFAULT_BASE_URL: &str = "https://dashboard.ecocare.co.id";
pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const MAX_WORKERS_RANGE: (usize, usize) = (1, 10);
pub const DEFAULT_INTERVAL_MINUTES: u32 = 120;
pub const INTERVAL_MINUTES_RANGE: (u32, u32) = (1, 1440);
pub const DEFAULT_BUSY_MINUTES: u32 = 35;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Login credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields are required before a run may authenticate.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// `INTERVAL` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSettings {
    /// Start in auto mode.
    pub enabled: bool,
    /// Base re-run interval.
    pub interval_minutes: u32,
    /// Shell-only hint, carried for the shell's benefit.
    pub minimize_to_tray: bool,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            minimize_to_tray: false,
        }
    }
}

/// Resolved configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Origin for auth endpoints and relative report URLs.
    pub base_url: String,
    /// Root for persisted files.
    pub output_dir: PathBuf,
    /// Coordinator concurrency limit, within [1, 10].
    pub max_workers: usize,
    /// Transport timeout for each HTTP request.
    pub request_timeout_secs: u64,
    pub credentials: Credentials,
    pub interval: IntervalSettings,
    /// Busy-window width per even hour, within [0, 59].
    pub busy_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: PathBuf::from("."),
            max_workers: DEFAULT_MAX_WORKERS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credentials: Credentials::default(),
            interval: IntervalSettings::default(),
            busy_minutes: DEFAULT_BUSY_MINUTES,
        }
    }
}

impl EngineConfig {
    /// Read and resolve an INI file. A missing file yields the defaults.
    pub fn from_ini_file(path: &Path) -> Result<Self, EngineError> {
        let sections = IniSections::read(path)?;
        Ok(Self::from_sections(&sections))
    }

    /// Resolve a parsed INI document, falling back to defaults for absent or
    /// malformed values.
    pub fn from_sections(sections: &IniSections) -> Self {
        let defaults = Self::default();

        let base_url = match sections.get("SETTINGS", "base_url") {
            Some(raw) if url::Url::parse(raw).is_ok() => raw.trim_end_matches('/').to_string(),
            Some(raw) => {
                warn!(value = %raw, "Invalid SETTINGS.base_url, using default");
                defaults.base_url
            }
            None => defaults.base_url,
        };

        let output_dir = sections
            .get("SETTINGS", "output_dir")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let max_workers = clamped(
            sections,
            "SETTINGS",
            "max_workers",
            DEFAULT_MAX_WORKERS,
            MAX_WORKERS_RANGE,
        );

        let request_timeout_secs = parsed(
            sections,
            "SETTINGS",
            "request_timeout_secs",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )
        .max(1);

        let credentials = Credentials {
            username: sections.get("LOGIN", "username").unwrap_or_default().to_string(),
            password: sections.get("LOGIN", "password").unwrap_or_default().to_string(),
        };

        let interval = IntervalSettings {
            enabled: flag(sections, "INTERVAL", "enabled", false),
            interval_minutes: clamped(
                sections,
                "INTERVAL",
                "interval_minutes",
                DEFAULT_INTERVAL_MINUTES,
                INTERVAL_MINUTES_RANGE,
            ),
            minimize_to_tray: flag(sections, "INTERVAL", "minimize_to_tray", false),
        };

        let busy_minutes = clamped(
            sections,
            "SERVER",
            "busy_minutes",
            DEFAULT_BUSY_MINUTES,
            (0, 59),
        );

        Self {
            base_url,
            output_dir,
            max_workers,
            request_timeout_secs,
            credentials,
            interval,
            busy_minutes,
        }
    }

    /// Check the values an extraction cannot proceed without.
    pub fn validate_for_extraction(&self) -> Result<(), EngineError> {
        if !self.credentials.is_complete() {
            return Err(EngineError::Config(
                "username or password missing in the [LOGIN] section".to_string(),
            ));
        }
        Ok(())
    }

    /// The maintenance window derived from `busy_minutes`.
    pub fn busy_window(&self) -> BusyWindow {
        BusyWindow::new(self.busy_minutes)
    }
}

/// Parsed INI document with case-insensitive section and key lookup.
#[derive(Debug, Clone, Default)]
pub struct IniSections {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniSections {
    /// Load an INI file. A missing file is an empty document.
    pub fn read(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text).map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse INI text directly. Values are kept verbatim: no quote
    /// stripping, no backslash escapes.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let options = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(text, options)
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let mut raw: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (section, properties) in ini.iter() {
            let keys = raw.entry(section.unwrap_or_default().to_string()).or_default();
            for (key, value) in properties.iter() {
                keys.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self::from_map(raw))
    }

    fn from_map(raw: HashMap<String, HashMap<String, String>>) -> Self {
        let sections = raw
            .into_iter()
            .map(|(section, keys)| {
                let keys = keys
                    .into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
                    .collect();
                (section.to_ascii_lowercase(), keys)
            })
            .collect();
        Self { sections }
    }

    /// Look up `section.key`.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(&section.to_ascii_lowercase())
            .and_then(|keys| keys.get(&key.to_ascii_lowercase()))
            .map(String::as_str)
    }
}

fn parsed<T>(sections: &IniSections, section: &str, key: &str, default: T) -> T
where
    T: std::str::FromStr + fmt::Display + Copy,
{
    match sections.get(section, key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(section, key, value = %raw, default = %default, "Malformed config value, using default");
            default
        }),
        None => default,
    }
}

fn clamped<T>(sections: &IniSections, section: &str, key: &str, default: T, range: (T, T)) -> T
where
    T: std::str::FromStr + fmt::Display + Copy + Ord,
{
    let value = parsed(sections, section, key, default);
    let bounded = value.clamp(range.0, range.1);
    if bounded != value {
        warn!(section, key, value = %value, used = %bounded, "Config value out of range, clamped");
    }
    bounded
}

fn flag(sections: &IniSections, section: &str, key: &str, default: bool) -> bool {
    match sections.get(section, key).map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => {
            warn!(section, key, value = %other, "Malformed boolean, using default");
            default
        }
        None => default,
    }
}

/// Where configuration snapshots come from.
pub trait ConfigSource: Send + Sync {
    /// Produce a fresh snapshot. Never fails: unreadable sources fall back to
    /// defaults and the missing-credentials check rejects the run later.
    fn load(&self) -> EngineConfig;
}

/// Re-reads an INI file on every [`ConfigSource::load`].
#[derive(Debug, Clone)]
pub struct IniConfigSource {
    path: PathBuf,
}

impl IniConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for IniConfigSource {
    fn load(&self) -> EngineConfig {
        EngineConfig::from_ini_file(&self.path).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read config, using defaults");
            EngineConfig::default()
        })
    }
}

/// Serves a fixed snapshot.
#[derive(Debug, Clone)]
pub struct StaticConfig(pub EngineConfig);

impl ConfigSource for StaticConfig {
    fn load(&self) -> EngineConfig {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_document() {
        let ini = "\
[SETTINGS]
base_url = https://dash.example.com/
output_dir = /tmp/out
max_workers = 3

[LOGIN]
username = alice
password = s3cret

[INTERVAL]
enabled = True
interval_minutes = 60
minimize_to_tray = false

[SERVER]
busy_minutes = 20
";
        let config = EngineConfig::from_sections(&IniSections::parse(ini).unwrap());

        assert_eq!(config.base_url, "https://dash.example.com");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.credentials, Credentials::new("alice", "s3cret"));
        assert!(config.interval.enabled);
        assert_eq!(config.interval.interval_minutes, 60);
        assert!(!config.interval.minimize_to_tray);
        assert_eq!(config.busy_minutes, 20);
        assert!(config.validate_for_extraction().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_sections(&IniSections::default());
        assert_eq!(config, EngineConfig::default());
        assert!(matches!(
            config.validate_for_extraction(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_and_out_of_range_values() {
        let ini = "\
[SETTINGS]
max_workers = lots
base_url = not a url

[INTERVAL]
interval_minutes = 99999
enabled = maybe

[SERVER]
busy_minutes = 75
";
        let config = EngineConfig::from_sections(&IniSections::parse(ini).unwrap());

        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.interval.interval_minutes, 1440);
        assert!(!config.interval.enabled);
        assert_eq!(config.busy_minutes, 59);
    }

    #[test]
    fn test_max_workers_clamped() {
        let ini = "[SETTINGS]\nmax_workers = 0\n";
        let config = EngineConfig::from_sections(&IniSections::parse(ini).unwrap());
        assert_eq!(config.max_workers, 1);

        let ini = "[SETTINGS]\nmax_workers = 42\n";
        let config = EngineConfig::from_sections(&IniSections::parse(ini).unwrap());
        assert_eq!(config.max_workers, 10);
    }

    #[test]
    fn test_section_lookup_is_case_insensitive() {
        let ini = "[login]\nUsername = bob\npassword = pw\n";
        let config = EngineConfig::from_sections(&IniSections::parse(ini).unwrap());
        assert_eq!(config.credentials.username, "bob");
    }

    #[test]
    fn test_values_are_kept_verbatim() {
        let ini = "[LOGIN]\nusername = \"quoted\"\npassword = pa\\ss;#=x\n";
        let config = EngineConfig::from_sections(&IniSections::parse(ini).unwrap());
        assert_eq!(config.credentials.username, "\"quoted\"");
        assert_eq!(config.credentials.password, "pa\\ss;#=x");
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let source = IniConfigSource::new(dir.path().join("absent.ini"));
        assert_eq!(source.load(), EngineConfig::default());
    }

    #[test]
    fn test_ini_source_rereads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[SETTINGS]\nmax_workers = 2\n").unwrap();
        let source = IniConfigSource::new(&path);
        assert_eq!(source.load().max_workers, 2);

        std::fs::write(&path, "[SETTINGS]\nmax_workers = 7\n").unwrap();
        assert_eq!(source.load().max_workers, 7);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "s3cret");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("s3cret"));
    }
}
