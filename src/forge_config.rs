//! Configuration for Forge, read from `.forge/forge.toml`.
//!
//! Every section is optional; a missing file yields the defaults (a single
//! local template provider and no quality rules). Settings are layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev_mode = false
//!
//! [logging]
//! level = "info"
//! format = "text"        # or "json"
//! file = "forge.log"     # optional, rotated daily under .forge/logs/
//!
//! [storage]
//! persist = true
//!
//! [[providers]]
//! id = "template"
//! kind = "template"
//! expected_stages = 4
//!
//! [[providers]]
//! id = "studio"
//! name = "Studio backend"
//! kind = "http"
//! base_url = "http://localhost:9000"
//! supports_cancel = true
//! poll_interval_ms = 500
//!
//! [quality.rules.length]
//! kind = "min_length"
//! min = 200
//!
//! [quality.rules.no-placeholders]
//! kind = "forbidden_terms"
//! terms = ["TODO", "lorem ipsum"]
//! severity = "warning"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use forge_common::{ForgeError, ForgeResult, ProviderDescriptor};

use crate::gates::{QualityGate, Rule, RuleConfig};
use crate::provider::{HttpProvider, HttpProviderConfig, Provider, TemplateProvider};
use crate::registry::ProviderRegistry;

/// Written by `forge config init`.
pub const DEFAULT_CONFIG: &str = r#"# Forge configuration

[server]
host = "127.0.0.1"
port = 3141

[logging]
level = "info"
format = "text"

[storage]
persist = true

[[providers]]
id = "template"
name = "Template"
kind = "template"
expected_stages = 4

# [[providers]]
# id = "studio"
# kind = "http"
# base_url = "http://localhost:9000"
# supports_cancel = true

# [quality.rules.length]
# kind = "min_length"
# min = 200
"#;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}. Use text or json", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables permissive CORS for a separately served UI.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive, e.g. `info` or `forge=debug,tower_http=warn`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// File name under `.forge/logs/`. Console only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Defaults to `.forge/projects`. Relative paths resolve against the
    /// project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects_dir: Option<PathBuf>,
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_persist() -> bool {
    true
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            projects_dir: None,
            persist: default_persist(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Template,
    Http,
    External,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Template => write!(f, "template"),
            Self::Http => write!(f, "http"),
            Self::External => write!(f, "external"),
        }
    }
}

/// One `[[providers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_cancel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_stages: Option<u32>,
    /// Required for `http` providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Name sent to the remote service; defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Delay between template stages.
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_step_delay_ms() -> u64 {
    250
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            supports_cancel: None,
            expected_stages: None,
            base_url: None,
            remote_id: None,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
            step_delay_ms: default_step_delay_ms(),
        }
    }

    /// Template providers and cancel-capable remotes honor cancellation.
    fn supports_cancel(&self) -> bool {
        self.supports_cancel
            .unwrap_or(self.kind == ProviderKind::Template)
    }

    pub fn descriptor(&self) -> ProviderDescriptor {
        let stages = match self.kind {
            ProviderKind::Template => self.expected_stages.unwrap_or(4),
            _ => self.expected_stages.unwrap_or(0),
        };
        ProviderDescriptor::new(&self.id, self.name.clone().unwrap_or_else(|| self.id.clone()))
            .with_cancel(self.supports_cancel())
            .with_expected_stages(stages)
    }

    /// Instantiate the configured provider.
    pub fn build(&self) -> ForgeResult<Provider> {
        match self.kind {
            ProviderKind::Template => Ok(Provider::Template(TemplateProvider::new(
                self.descriptor().capabilities.expected_stages,
                Duration::from_millis(self.step_delay_ms),
            ))),
            ProviderKind::Http => {
                let base_url = self.base_url.clone().ok_or_else(|| {
                    ForgeError::Config(format!("provider '{}' needs a base_url", self.id))
                })?;
                let provider = HttpProvider::new(HttpProviderConfig {
                    base_url,
                    remote_id: self.remote_id.clone().unwrap_or_else(|| self.id.clone()),
                    poll_interval: Duration::from_millis(self.poll_interval_ms),
                    request_timeout: Duration::from_secs(self.timeout_secs),
                    supports_cancel: self.supports_cancel(),
                })?;
                Ok(Provider::Http(provider))
            }
            ProviderKind::External => Ok(Provider::External),
        }
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    let mut template = ProviderConfig::new("template", ProviderKind::Template);
    template.name = Some("Template".to_string());
    template.expected_stages = Some(4);
    vec![template]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualitySection {
    /// Rule tables keyed by rule id.
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
}

/// The complete forge.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub quality: QualitySection,
}

impl Default for ForgeToml {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            logging: LoggingSection::default(),
            storage: StorageSection::default(),
            providers: default_providers(),
            quality: QualitySection::default(),
        }
    }
}

impl ForgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse forge.toml")
    }

    /// Load configuration from the default location (.forge/forge.toml).
    /// Returns default configuration if file doesn't exist.
    pub fn load_or_default(forge_dir: &Path) -> Result<Self> {
        let config_path = forge_dir.join("forge.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize forge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `FORGE_PORT`, `FORGE_LOG` and `FORGE_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup. Unparseable values
    /// are logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("FORGE_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid FORGE_PORT"),
            }
        }
        if let Some(level) = lookup("FORGE_LOG")
            && !level.trim().is_empty()
        {
            self.logging.level = level;
        }
        if let Some(format) = lookup("FORGE_LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.logging.format = format,
                Err(e) => tracing::warn!(error = %e, "ignoring FORGE_LOG_FORMAT"),
            }
        }
    }

    /// Register every configured provider, in file order.
    pub fn build_registry(&self) -> ForgeResult<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for config in &self.providers {
            registry.register(config.descriptor(), config.build()?)?;
        }
        Ok(registry)
    }

    pub fn build_gate(&self) -> ForgeResult<QualityGate> {
        QualityGate::from_config(&self.quality.rules)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; the OS will pick a random port".to_string());
        }

        if self.providers.is_empty() {
            warnings.push("No providers configured; jobs cannot be started".to_string());
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                warnings.push("Provider with an empty id".to_string());
            }
            if !seen.insert(provider.id.as_str()) {
                warnings.push(format!("Duplicate provider id '{}'", provider.id));
            }
            match provider.kind {
                ProviderKind::Http => match provider.base_url.as_deref() {
                    None => warnings.push(format!(
                        "Provider '{}' is http but has no base_url",
                        provider.id
                    )),
                    Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                        warnings.push(format!(
                            "Provider '{}' base_url '{}' should start with http:// or https://",
                            provider.id, url
                        ))
                    }
                    Some(_) => {}
                },
                _ if provider.base_url.is_some() => warnings.push(format!(
                    "Provider '{}' is {} and ignores base_url",
                    provider.id, provider.kind
                )),
                _ => {}
            }
            if provider.kind == ProviderKind::Http && provider.poll_interval_ms == 0 {
                warnings.push(format!(
                    "Provider '{}' has poll_interval_ms = 0",
                    provider.id
                ));
            }
        }

        for (id, rule) in &self.quality.rules {
            if let Err(e) = Rule::compile(id, rule) {
                warnings.push(format!("Quality rule '{}': {}", id, e));
            }
        }

        warnings
    }
}

/// Configuration bound to a project directory.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .forge directory
    pub forge_dir: PathBuf,
    /// Parsed forge.toml with environment overrides applied
    pub toml: ForgeToml,
}

impl ForgeConfig {
    /// Load `.forge/forge.toml` under `project_dir` and apply environment
    /// overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let forge_dir = project_dir.join(".forge");
        let mut toml = ForgeToml::load_or_default(&forge_dir)?;
        toml.apply_env_overrides();

        Ok(Self {
            project_dir,
            forge_dir,
            toml,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.forge_dir.join("forge.toml")
    }

    pub fn projects_dir(&self) -> PathBuf {
        match &self.toml.storage.projects_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.project_dir.join(dir),
            None => self.forge_dir.join("projects"),
        }
    }

    /// Get path to log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.forge_dir.join("logs")
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::RuleKind;
    use forge_common::Severity;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = ForgeToml::parse("").unwrap();
        assert_eq!(toml.server.port, 3141);
        assert_eq!(toml.server.host, "127.0.0.1");
        assert_eq!(toml.logging.format, LogFormat::Text);
        assert!(toml.storage.persist);
        assert_eq!(toml.providers.len(), 1);
        assert_eq!(toml.providers[0].kind, ProviderKind::Template);
        assert!(toml.quality.rules.is_empty());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_default_config_template_parses_cleanly() {
        let toml = ForgeToml::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(toml.providers[0].id, "template");
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_providers_and_rules() {
        let content = r#"
[server]
port = 8080
dev_mode = true

[[providers]]
id = "studio"
kind = "http"
base_url = "http://localhost:9000"
supports_cancel = true
poll_interval_ms = 200

[[providers]]
id = "inbox"
kind = "external"

[quality.rules.length]
kind = "min_length"
min = 10

[quality.rules.placeholders]
kind = "forbidden_terms"
terms = ["TODO"]
severity = "warning"
"#;
        let toml = ForgeToml::parse(content).unwrap();
        assert_eq!(toml.server.port, 8080);
        assert!(toml.server.dev_mode);
        assert_eq!(toml.providers.len(), 2);
        assert_eq!(toml.providers[0].poll_interval_ms, 200);
        assert_eq!(toml.providers[1].timeout_secs, 30);
        assert_eq!(
            toml.quality.rules["length"].kind,
            RuleKind::MinLength { min: 10 }
        );
        assert_eq!(
            toml.quality.rules["placeholders"].severity,
            Some(Severity::Warning)
        );
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_build_registry_in_file_order() {
        let content = r#"
[[providers]]
id = "inbox"
kind = "external"

[[providers]]
id = "local"
kind = "template"
expected_stages = 2
"#;
        let registry = ForgeToml::parse(content).unwrap().build_registry().unwrap();
        let ids: Vec<_> = registry.list().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["inbox", "local"]);

        let local = registry.descriptor("local").unwrap();
        assert!(local.capabilities.supports_cancel);
        assert_eq!(local.capabilities.expected_stages, 2);
        assert!(!registry.descriptor("inbox").unwrap().capabilities.supports_cancel);
    }

    #[test]
    fn test_build_registry_rejects_duplicates_and_missing_url() {
        let dup = r#"
[[providers]]
id = "a"
kind = "external"

[[providers]]
id = "a"
kind = "template"
"#;
        let toml = ForgeToml::parse(dup).unwrap();
        assert!(matches!(
            toml.build_registry(),
            Err(ForgeError::DuplicateProvider(_))
        ));
        assert!(toml.validate().iter().any(|w| w.contains("Duplicate")));

        let no_url = r#"
[[providers]]
id = "remote"
kind = "http"
"#;
        let toml = ForgeToml::parse(no_url).unwrap();
        assert!(matches!(toml.build_registry(), Err(ForgeError::Config(_))));
        assert!(toml.validate().iter().any(|w| w.contains("no base_url")));
    }

    #[test]
    fn test_validate_reports_bad_rule() {
        let content = r#"
[quality.rules.secrets]
kind = "forbidden_pattern"
pattern = "(unclosed"
"#;
        let toml = ForgeToml::parse(content).unwrap();
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("secrets"));
        assert!(toml.build_gate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FORGE_PORT", "9999"),
            ("FORGE_LOG", "debug"),
            ("FORGE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut toml = ForgeToml::default();
        toml.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(toml.server.port, 9999);
        assert_eq!(toml.logging.level, "debug");
        assert_eq!(toml.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_env_overrides_are_ignored() {
        let mut toml = ForgeToml::default();
        toml.apply_overrides_from(|key| match key {
            "FORGE_PORT" => Some("not-a-port".into()),
            "FORGE_LOG_FORMAT" => Some("xml".into()),
            _ => None,
        });
        assert_eq!(toml.server.port, 3141);
        assert_eq!(toml.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_save_and_load_roundtrip_through_forge_dir() {
        let dir = tempdir().unwrap();
        let forge_dir = dir.path().join(".forge");
        std::fs::create_dir_all(&forge_dir).unwrap();

        let mut toml = ForgeToml::default();
        toml.server.port = 4000;
        toml.quality
            .rules
            .insert("length".into(), RuleConfig::new(RuleKind::MinLength { min: 5 }));
        toml.save(&forge_dir.join("forge.toml")).unwrap();

        let loaded = ForgeToml::load_or_default(&forge_dir).unwrap();
        assert_eq!(loaded.server.port, 4000);
        assert_eq!(loaded.quality.rules.len(), 1);
    }

    #[test]
    fn test_forge_config_paths() {
        let dir = tempdir().unwrap();
        let config = ForgeConfig::new(dir.path().to_path_buf()).unwrap();
        assert!(config.config_file().ends_with(".forge/forge.toml"));
        assert!(config.projects_dir().ends_with(".forge/projects"));
        assert!(config.log_dir().ends_with(".forge/logs"));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
