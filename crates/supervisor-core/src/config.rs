//! Run configuration: a flat `key = value` file, one setting per line.
//!
//! Parsing intentionally mirrors a classic `key=value` settings file
//! rather than TOML/YAML: comments start with `#`, blank lines are
//! skipped, and values may be quoted to preserve surrounding whitespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::Tier;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid line {line_number} in config: {line}")]
    InvalidLine { line_number: usize, line: String },
    #[error("invalid boolean for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("invalid float for {key}: {value}")]
    InvalidFloat { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("invalid tier `{0}` for risk trigger `{1}`")]
    InvalidTier(String, String),
}

/// A single `verification.risk_triggers.<name>.*` entry: a named glob set
/// that escalates verification to `tier` when any changed file matches.
#[derive(Debug, Clone, Default)]
pub struct RiskTriggerConfig {
    pub name: String,
    pub patterns: Vec<String>,
    pub tier: Tier,
}

/// A single `workers.<role>.*` override of the worker's invocation.
#[derive(Debug, Clone, Default)]
pub struct WorkerOverride {
    pub bin: Option<String>,
    pub args: Vec<String>,
    pub output: Option<String>,
}

/// Run-level configuration (spec §6.4).
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace_root: PathBuf,
    pub base_branch: String,
    pub run_branch_prefix: String,
    pub runs_dir: PathBuf,

    pub planner_cmd: String,
    pub implementer_cmd: String,
    pub reviewer_cmd: String,

    pub worker_timeout_sec: u64,
    pub worker_retries: u32,
    pub worker_retry_backoff_sec: u64,

    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub lockfiles: Vec<String>,
    pub allow_deps: bool,
    pub env_allowlist: Vec<String>,

    pub tier0_cmds: Vec<String>,
    pub tier1_cmds: Vec<String>,
    pub tier2_cmds: Vec<String>,
    pub verify_timeout_sec: u64,
    pub verification_cwd: Option<PathBuf>,
    pub risk_triggers: Vec<RiskTriggerConfig>,

    pub workflow_profile: Option<String>,
    pub worker_overrides: BTreeMap<String, WorkerOverride>,

    pub max_milestone_retries: u32,
    pub max_review_rounds: u32,
    pub max_phase_retries: u32,

    pub auto_resume: bool,
    pub auto_resume_cooldown_sec: u64,
    pub auto_resume_max_attempts: u32,
    pub auto_resume_poll_interval_sec: u64,

    pub receipt_gzip_threshold_bytes: u64,

    pub log_level: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            base_branch: "main".to_string(),
            run_branch_prefix: "run/".to_string(),
            runs_dir: PathBuf::from(".runs"),

            planner_cmd: String::new(),
            implementer_cmd: String::new(),
            reviewer_cmd: String::new(),

            worker_timeout_sec: 900,
            worker_retries: 1,
            worker_retry_backoff_sec: 5,

            allowlist: Vec::new(),
            denylist: Vec::new(),
            lockfiles: vec!["Cargo.lock".to_string()],
            allow_deps: false,
            env_allowlist: Vec::new(),

            tier0_cmds: Vec::new(),
            tier1_cmds: Vec::new(),
            tier2_cmds: Vec::new(),
            verify_timeout_sec: 600,
            verification_cwd: None,
            risk_triggers: Vec::new(),

            workflow_profile: None,
            worker_overrides: BTreeMap::new(),

            max_milestone_retries: 2,
            max_review_rounds: 3,
            max_phase_retries: 2,

            auto_resume: false,
            auto_resume_cooldown_sec: 60,
            auto_resume_max_attempts: 3,
            auto_resume_poll_interval_sec: 30,

            receipt_gzip_threshold_bytes: 256 * 1024,

            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_content(&content)
    }

    pub fn parse_content(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::InvalidLine {
                    line_number: idx + 1,
                    line: raw_line.to_string(),
                });
            };
            let key = key.trim();
            let value = unquote(value.trim());
            config.apply_value(key, &value)?;
        }
        Ok(config)
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "workspace_root" => self.workspace_root = PathBuf::from(value),
            "base_branch" => self.base_branch = value.to_string(),
            "run_branch_prefix" => self.run_branch_prefix = value.to_string(),
            "runs_dir" => self.runs_dir = PathBuf::from(value),

            "planner_cmd" => self.planner_cmd = value.to_string(),
            "implementer_cmd" => self.implementer_cmd = value.to_string(),
            "reviewer_cmd" => self.reviewer_cmd = value.to_string(),

            "worker_timeout_sec" => self.worker_timeout_sec = parse_int(key, value)?,
            "worker_retries" => self.worker_retries = parse_int(key, value)? as u32,
            "worker_retry_backoff_sec" => self.worker_retry_backoff_sec = parse_int(key, value)?,

            "allowlist" => self.allowlist = parse_list(value),
            "denylist" => self.denylist = parse_list(value),
            "lockfiles" => self.lockfiles = parse_list(value),
            "allow_deps" => self.allow_deps = parse_bool(key, value)?,

            "tier0_cmds" => self.tier0_cmds = parse_list(value),
            "tier1_cmds" => self.tier1_cmds = parse_list(value),
            "tier2_cmds" => self.tier2_cmds = parse_list(value),
            "verify_timeout_sec" => self.verify_timeout_sec = parse_int(key, value)?,

            "max_milestone_retries" => self.max_milestone_retries = parse_int(key, value)? as u32,
            "max_review_rounds" => self.max_review_rounds = parse_int(key, value)? as u32,
            "max_phase_retries" => self.max_phase_retries = parse_int(key, value)? as u32,

            "auto_resume" => self.auto_resume = parse_bool(key, value)?,
            "auto_resume_cooldown_sec" => self.auto_resume_cooldown_sec = parse_int(key, value)?,
            "auto_resume_max_attempts" => {
                self.auto_resume_max_attempts = parse_int(key, value)? as u32;
            }
            "auto_resume_poll_interval_sec" => {
                self.auto_resume_poll_interval_sec = parse_int(key, value)?;
            }

            "receipt_gzip_threshold_bytes" => {
                self.receipt_gzip_threshold_bytes = parse_int(key, value)?;
            }

            "log_level" => self.log_level = value.to_string(),
            "log_json" => self.log_json = parse_bool(key, value)?,

            "resilience.max_auto_resumes" => {
                self.auto_resume_max_attempts = parse_int(key, value)? as u32;
            }

            other if other.starts_with("scope.") => self.apply_scope_key(other, value)?,
            other if other.starts_with("verification.") => self.apply_verification_key(other, value)?,
            other if other.starts_with("workflow.") => self.apply_workflow_key(other, value),
            other if other.starts_with("workers.") => self.apply_worker_key(other, value)?,

            other => {
                eprintln!("warning: unknown config key `{other}`, ignoring");
                return Ok(());
            }
        }
        Ok(())
    }

    fn apply_scope_key(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key.strip_prefix("scope.").unwrap_or_default() {
            "allowlist" => self.allowlist = parse_list(value),
            "denylist" => self.denylist = parse_list(value),
            "lockfiles" => self.lockfiles = parse_list(value),
            "allow_deps" => self.allow_deps = parse_bool(key, value)?,
            "env_allowlist" => self.env_allowlist = parse_list(value),
            other => {
                eprintln!("warning: unknown config key `scope.{other}`, ignoring");
            }
        }
        Ok(())
    }

    fn apply_verification_key(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let rest = key.strip_prefix("verification.").unwrap_or_default();
        if let Some(trigger_key) = rest.strip_prefix("risk_triggers.") {
            let Some((name, field)) = trigger_key.split_once('.') else {
                eprintln!("warning: malformed risk trigger key `{key}`, ignoring");
                return Ok(());
            };
            let trigger = match self.risk_triggers.iter_mut().find(|t| t.name == name) {
                Some(t) => t,
                None => {
                    self.risk_triggers.push(RiskTriggerConfig {
                        name: name.to_string(),
                        patterns: Vec::new(),
                        tier: Tier::Tier1,
                    });
                    self.risk_triggers.last_mut().unwrap()
                }
            };
            match field {
                "patterns" => trigger.patterns = parse_list(value),
                "tier" => trigger.tier = parse_tier(name, value)?,
                other => eprintln!("warning: unknown risk trigger field `{other}` on `{name}`, ignoring"),
            }
            return Ok(());
        }
        match rest {
            "cwd" => self.verification_cwd = Some(PathBuf::from(value)),
            other => eprintln!("warning: unknown config key `verification.{other}`, ignoring"),
        }
        Ok(())
    }

    fn apply_workflow_key(&mut self, key: &str, value: &str) {
        match key.strip_prefix("workflow.").unwrap_or_default() {
            "profile" => self.workflow_profile = Some(value.to_string()),
            other => eprintln!("warning: unknown config key `workflow.{other}`, ignoring"),
        }
    }

    fn apply_worker_key(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let rest = key.strip_prefix("workers.").unwrap_or_default();
        let Some((role, field)) = rest.split_once('.') else {
            eprintln!("warning: malformed worker override key `{key}`, ignoring");
            return Ok(());
        };
        let override_entry = self.worker_overrides.entry(role.to_string()).or_default();
        match field {
            "bin" => override_entry.bin = Some(value.to_string()),
            "args" => override_entry.args = parse_list(value),
            "output" => override_entry.output = Some(value.to_string()),
            other => eprintln!("warning: unknown worker override field `{other}` on `{role}`, ignoring"),
        }
        Ok(())
    }
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_int(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidInt {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_tier(trigger_name: &str, value: &str) -> Result<Tier, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "tier0" => Ok(Tier::Tier0),
        "tier1" => Ok(Tier::Tier1),
        "tier2" => Ok(Tier::Tier2),
        other => Err(ConfigError::InvalidTier(other.to_string(), trigger_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_key_value_pairs() {
        let content = "base_branch = develop\nworker_timeout_sec = 120\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.base_branch, "develop");
        assert_eq!(config.worker_timeout_sec, 120);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let content = "# a comment\n\nbase_branch = staging\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.base_branch, "staging");
    }

    #[test]
    fn unquotes_quoted_values() {
        let content = r#"run_branch_prefix = "run/feature/""#;
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.run_branch_prefix, "run/feature/");
    }

    #[test]
    fn parses_comma_separated_lists() {
        let content = "allowlist = src/**, tests/**\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.allowlist, vec!["src/**", "tests/**"]);
    }

    #[test]
    fn unknown_keys_warn_but_do_not_fail() {
        let content = "totally_made_up_key = 1\nbase_branch = main\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.base_branch, "main");
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let content = "auto_resume = maybe\n";
        let err = Config::parse_content(content).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBool { .. }));
    }

    #[test]
    fn line_without_equals_is_rejected() {
        let content = "this is not valid\n";
        let err = Config::parse_content(content).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLine { .. }));
    }

    #[test]
    fn dotted_scope_keys_populate_scope_fields() {
        let content = "scope.allowlist = src/**\nscope.env_allowlist = RUNR_TOKEN\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.allowlist, vec!["src/**".to_string()]);
        assert_eq!(config.env_allowlist, vec!["RUNR_TOKEN".to_string()]);
    }

    #[test]
    fn dotted_verification_cwd_is_parsed() {
        let content = "verification.cwd = subdir\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.verification_cwd, Some(PathBuf::from("subdir")));
    }

    #[test]
    fn dotted_risk_trigger_keys_accumulate_by_name() {
        let content = "verification.risk_triggers.lockfile.patterns = Cargo.lock\nverification.risk_triggers.lockfile.tier = tier2\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.risk_triggers.len(), 1);
        assert_eq!(config.risk_triggers[0].name, "lockfile");
        assert_eq!(config.risk_triggers[0].patterns, vec!["Cargo.lock".to_string()]);
        assert_eq!(config.risk_triggers[0].tier, Tier::Tier2);
    }

    #[test]
    fn dotted_workflow_profile_is_parsed() {
        let content = "workflow.profile = strict\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.workflow_profile, Some("strict".to_string()));
    }

    #[test]
    fn dotted_worker_override_keys_populate_by_role() {
        let content = "workers.reviewer.bin = /usr/bin/custom-reviewer\nworkers.reviewer.output = json_lines\n";
        let config = Config::parse_content(content).unwrap();
        let reviewer = config.worker_overrides.get("reviewer").unwrap();
        assert_eq!(reviewer.bin, Some("/usr/bin/custom-reviewer".to_string()));
        assert_eq!(reviewer.output, Some("json_lines".to_string()));
    }

    #[test]
    fn resilience_max_auto_resumes_aliases_auto_resume_max_attempts() {
        let content = "resilience.max_auto_resumes = 7\n";
        let config = Config::parse_content(content).unwrap();
        assert_eq!(config.auto_resume_max_attempts, 7);
    }
}
