//! `.bclrc` configuration.
//!
//! The file holds interpreter limits, one setting per line:
//!
//! | Line                          | Action                          |
//! |-------------------------------|---------------------------------|
//! | `SET max_recursion 500`       | set a key                       |
//! | `max_scope_depth = 64`        | same, assignment form           |
//! | `# ...`                       | comment, ignored                |
//!
//! Keys are case-insensitive.  Problems on individual lines are collected as
//! [`ConfigError`]s and never stop the rest of the file from loading.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default limit on nested evaluations.
pub const DEFAULT_MAX_RECURSION: usize = 1000;

/// Default limit on simultaneously open procedure scopes.
pub const DEFAULT_MAX_SCOPE_DEPTH: usize = 256;

/// Name of the per-user config file.
pub const RC_FILE: &str = ".bclrc";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Interpreter limits and parsing mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_recursion: usize,
    pub max_scope_depth: usize,
    /// Reject mismatched block nesting instead of repairing it.
    pub strict_blocks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_recursion: DEFAULT_MAX_RECURSION,
            max_scope_depth: DEFAULT_MAX_SCOPE_DEPTH,
            strict_blocks: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string on top of the defaults.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let errors = config.apply_str(s);
        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply the settings in `s` to `self`, returning per-line problems.
    pub fn apply_str(&mut self, s: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = split_setting(line) else {
                errors.push(ConfigError {
                    line: i + 1,
                    message: format!("expected \"SET name value\" or \"name = value\", got \"{line}\""),
                });
                continue;
            };
            if let Err(message) = self.set(key, value) {
                errors.push(ConfigError { line: i + 1, message });
            }
        }
        errors
    }

    /// Set one key by name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key.to_ascii_lowercase().as_str() {
            "max_recursion" => self.max_recursion = parse_limit(key, value)?,
            "max_scope_depth" => self.max_scope_depth = parse_limit(key, value)?,
            "strict_blocks" => self.strict_blocks = parse_flag(key, value)?,
            _ => return Err(format!("unknown setting \"{key}\"")),
        }
        Ok(())
    }

    /// Override settings from `BCL_MAX_RECURSION`, `BCL_MAX_SCOPE_DEPTH` and
    /// `BCL_STRICT`.
    pub fn apply_env(&mut self) -> Vec<ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<ConfigError> {
        const VARS: [(&str, &str); 3] = [
            ("BCL_MAX_RECURSION", "max_recursion"),
            ("BCL_MAX_SCOPE_DEPTH", "max_scope_depth"),
            ("BCL_STRICT", "strict_blocks"),
        ];
        let mut errors = Vec::new();
        for (var, key) in VARS {
            if let Some(value) = lookup(var) {
                if let Err(message) = self.set(key, &value) {
                    errors.push(ConfigError { line: 0, message: format!("{var}: {message}") });
                }
            }
        }
        errors
    }
}

/// Locate the user config: `~/.bclrc` first, then `./.bclrc`.
pub fn find_user_config() -> Option<PathBuf> {
    let home = directories::BaseDirs::new().map(|d| d.home_dir().join(RC_FILE));
    home.into_iter()
        .chain(std::iter::once(PathBuf::from(RC_FILE)))
        .find(|p| p.is_file())
}

// ── Line parsing ──────────────────────────────────────────────────────────────

fn split_setting(line: &str) -> Option<(&str, &str)> {
    if let Some((key, value)) = line.split_once('=') {
        let key = key.trim();
        if !key.is_empty() && !key.contains(char::is_whitespace) {
            return Some((key, value.trim()));
        }
    }
    let (first, rest) = line.split_once(char::is_whitespace)?;
    if !first.eq_ignore_ascii_case("SET") {
        return None;
    }
    let (key, value) = rest.trim().split_once(char::is_whitespace)?;
    Some((key, value.trim()))
}

fn parse_limit(key: &str, value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{key}: expected a positive integer, got \"{value}\"")),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "yes" | "true" => Ok(true),
        "0" | "off" | "no" | "false" => Ok(false),
        _ => Err(format!("{key}: expected on/off, got \"{value}\"")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
