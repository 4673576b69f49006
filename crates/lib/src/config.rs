//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.kgate/config.json`) and environment.
//! Policy fields have usable defaults; Mattermost connection fields must be set before `run`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Mattermost server, team, channel, and bot account.
    #[serde(default)]
    pub mattermost: MattermostConfig,

    /// Trigger prefix, allowed verbs, and forbidden flag combinations.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// External process limits and worker pool size.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Liveness probe endpoint.
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralConfig {
    /// Name used in start/stop announcements (default "kgate").
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
}

fn default_bot_name() -> String {
    "kgate".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
        }
    }
}

/// Mattermost connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MattermostConfig {
    /// Server base URL (e.g. "https://chat.example.com").
    pub host: Option<String>,
    pub team_name: Option<String>,
    /// Channel the bot monitors and replies in. Created when missing.
    pub channel_name: Option<String>,
    /// Display name used when the channel has to be created.
    pub channel_display_name: Option<String>,
    /// Bot account login (email or username).
    pub user_login: Option<String>,
    /// Bot account password. Overridden by KGATE_MATTERMOST_PASSWORD env.
    pub user_password: Option<String>,
}

/// One forbidden (verb, flag) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbiddenFlag {
    pub verb: String,
    pub flag: String,
}

impl ForbiddenFlag {
    pub fn new(verb: &str, flag: &str) -> Self {
        Self {
            verb: verb.to_string(),
            flag: flag.to_string(),
        }
    }
}

/// Command policy as written in the config file. Validated into `policy::Policy` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Literal first token that marks a command (default "!k").
    #[serde(default = "default_trigger_prefix")]
    pub trigger_prefix: String,
    /// Absolute path of the control-plane tool (default "/usr/local/bin/kubectl").
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Flag that scopes a command to one namespace (default "-n").
    #[serde(default = "default_namespace_flag")]
    pub namespace_flag: String,
    #[serde(default = "default_allowed_verbs")]
    pub allowed_verbs: Vec<String>,
    #[serde(default = "default_forbidden_flags")]
    pub forbidden_flags: Vec<ForbiddenFlag>,
    /// Namespace token that means "every namespace" (default "all").
    #[serde(default = "default_namespace_wildcard")]
    pub namespace_wildcard: String,
    /// Flag appended for the wildcard namespace (default "--all-namespaces").
    #[serde(default = "default_wildcard_flag")]
    pub wildcard_flag: String,
    /// When true, rejected commands get a short reply naming the reason. Default: silent.
    #[serde(default)]
    pub announce_rejections: bool,
}

fn default_trigger_prefix() -> String {
    "!k".to_string()
}

fn default_executable() -> String {
    "/usr/local/bin/kubectl".to_string()
}

fn default_namespace_flag() -> String {
    "-n".to_string()
}

fn default_allowed_verbs() -> Vec<String> {
    [
        "get",
        "describe",
        "logs",
        "top",
        "scale",
        "rollout",
        "exec",
        "explain",
        "api-resources",
        "version",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_forbidden_flags() -> Vec<ForbiddenFlag> {
    vec![
        ForbiddenFlag::new("logs", "-f"),
        ForbiddenFlag::new("logs", "--follow"),
        ForbiddenFlag::new("exec", "-it"),
        ForbiddenFlag::new("exec", "-ti"),
        ForbiddenFlag::new("exec", "-i"),
        ForbiddenFlag::new("exec", "-t"),
        ForbiddenFlag::new("exec", "--stdin"),
        ForbiddenFlag::new("exec", "--tty"),
        ForbiddenFlag::new("attach", "-i"),
        ForbiddenFlag::new("attach", "-it"),
        ForbiddenFlag::new("attach", "--stdin"),
        ForbiddenFlag::new("attach", "--tty"),
    ]
}

fn default_namespace_wildcard() -> String {
    "all".to_string()
}

fn default_wildcard_flag() -> String {
    "--all-namespaces".to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            trigger_prefix: default_trigger_prefix(),
            executable: default_executable(),
            namespace_flag: default_namespace_flag(),
            allowed_verbs: default_allowed_verbs(),
            forbidden_flags: default_forbidden_flags(),
            namespace_wildcard: default_namespace_wildcard(),
            wildcard_flag: default_wildcard_flag(),
            announce_rejections: false,
        }
    }
}

/// External process limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Hard timeout per command; the process is killed when it expires.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum commands running at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How long in-flight commands may run after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Output longer than this is cut and marked as truncated.
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_workers() -> usize {
    4
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_max_reply_chars() -> usize {
    12_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            workers: default_workers(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            max_reply_chars: default_max_reply_chars(),
        }
    }
}

/// Health endpoint bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_health_bind")]
    pub bind: String,
    /// Port (default 15152).
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_health_port() -> u16 {
    15152
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            bind: default_health_bind(),
            port: default_health_port(),
        }
    }
}

/// Mattermost settings with every required field present.
#[derive(Debug, Clone)]
pub struct ResolvedMattermost {
    pub host: String,
    pub team_name: String,
    pub channel_name: String,
    pub channel_display_name: String,
    pub user_login: String,
    pub user_password: String,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the bot password: env KGATE_MATTERMOST_PASSWORD overrides config.
pub fn resolve_mattermost_password(config: &Config) -> Option<String> {
    std::env::var("KGATE_MATTERMOST_PASSWORD")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| non_empty(config.mattermost.user_password.as_ref()))
}

/// Check that every Mattermost field needed to connect is set. Names the first missing key.
pub fn resolve_mattermost(config: &Config) -> Result<ResolvedMattermost> {
    let mm = &config.mattermost;
    let require = |value: Option<&String>, key: &str| {
        non_empty(value).with_context(|| format!("mattermost.{} is required", key))
    };
    let host = require(mm.host.as_ref(), "host")?;
    let team_name = require(mm.team_name.as_ref(), "teamName")?;
    let channel_name = require(mm.channel_name.as_ref(), "channelName")?;
    let user_login = require(mm.user_login.as_ref(), "userLogin")?;
    let user_password = resolve_mattermost_password(config).context(
        "mattermost.userPassword is required (or set KGATE_MATTERMOST_PASSWORD)",
    )?;
    let channel_display_name = non_empty(mm.channel_display_name.as_ref())
        .unwrap_or_else(|| format!("{} commands", config.general.bot_name));
    Ok(ResolvedMattermost {
        host: host.trim_end_matches('/').to_string(),
        team_name,
        channel_name,
        channel_display_name,
        user_login,
        user_password,
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("KGATE_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".kgate").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.policy.trigger_prefix, "!k");
        assert_eq!(config.policy.namespace_wildcard, "all");
        assert_eq!(config.policy.wildcard_flag, "--all-namespaces");
        assert_eq!(config.executor.timeout_secs, 30);
        assert_eq!(config.health.port, 15152);
        assert!(!config.policy.announce_rejections);
    }

    #[test]
    fn default_forbidden_flags_cover_streaming_and_interactive() {
        let flags = PolicyConfig::default().forbidden_flags;
        assert!(flags.contains(&ForbiddenFlag::new("logs", "-f")));
        assert!(flags.contains(&ForbiddenFlag::new("exec", "-it")));
        assert!(flags.contains(&ForbiddenFlag::new("exec", "--tty")));
        assert!(flags.contains(&ForbiddenFlag::new("attach", "--stdin")));
    }

    #[test]
    fn camel_case_policy_keys_parse() {
        let json = r#"{
            "policy": {
                "triggerPrefix": "!kube",
                "allowedVerbs": ["get"],
                "forbiddenFlags": [{ "verb": "get", "flag": "-w" }],
                "announceRejections": true
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.policy.trigger_prefix, "!kube");
        assert_eq!(config.policy.allowed_verbs, vec!["get".to_string()]);
        assert_eq!(
            config.policy.forbidden_flags,
            vec![ForbiddenFlag::new("get", "-w")]
        );
        assert!(config.policy.announce_rejections);
        assert_eq!(config.policy.executable, "/usr/local/bin/kubectl");
    }

    #[test]
    fn resolve_mattermost_names_missing_key() {
        let mut config = Config::default();
        config.mattermost.host = Some("https://chat.example.com/".to_string());
        let err = resolve_mattermost(&config).unwrap_err();
        assert!(err.to_string().contains("mattermost.teamName"));
    }

    #[test]
    fn resolve_mattermost_trims_host_and_defaults_display_name() {
        let mut config = Config::default();
        config.mattermost = MattermostConfig {
            host: Some("https://chat.example.com/".to_string()),
            team_name: Some("ops".to_string()),
            channel_name: Some("kube".to_string()),
            channel_display_name: None,
            user_login: Some("bot@example.com".to_string()),
            user_password: Some("secret".to_string()),
        };
        let mm = resolve_mattermost(&config).unwrap();
        assert_eq!(mm.host, "https://chat.example.com");
        assert_eq!(mm.channel_display_name, "kgate commands");
    }
}
