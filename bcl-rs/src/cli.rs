//! Command-line argument parsing.
//!
//! Usage:
//!   bcl [-d] [-s] [-f[<file>]] [-c <script>] [script.bcl | -] [args...]
//!
//! The config file must be attached to its flag (`-fmy.rc`).  A bare `-f`
//! never takes the next argument, so `bcl -f run.bcl` runs `run.bcl` without
//! any user config.

use std::path::PathBuf;

use thiserror::Error;

/// One-line usage summary printed on a usage error.
pub const USAGE: &str = "Usage: bcl [-d] [-s] [-f[<file>]] [-c <script>] [script.bcl | -] [args...]";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Debug logging (`-d`).
    pub debug: bool,
    /// Strict block parsing (`-s`).
    pub strict: bool,
    /// Which user config file to load.
    pub config: ConfigFile,
    /// Where the script comes from.
    pub script: ScriptSource,
    /// Everything after the script, visible through `ARGV`.
    pub script_args: Vec<String>,
}

/// How to choose the user config file.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// Search `~/.bclrc`, then `./.bclrc` (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip user config.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

/// Where the script text comes from.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ScriptSource {
    /// No script argument, or `-`.
    #[default]
    Stdin,
    /// A script file.
    File(PathBuf),
    /// `-c <script>`.
    Inline(String),
}

/// A usage error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CliError {
    #[error("unknown option: -{0}")]
    UnknownOption(char),
    #[error("-{0} requires an argument")]
    MissingArgument(char),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()`.
pub fn parse_args() -> Result<CliArgs, CliError> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    parse_argv(&raw)
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, CliError> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            i += 1;
            break;
        }
        // First positional ends option parsing.
        if !arg.starts_with('-') || arg == "-" {
            break;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,
                's' => args.strict = true,

                // -f<file>, or -f alone
                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                // -c<script> or -c <script>
                'c' => {
                    let text = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(CliError::MissingArgument('c'));
                    };
                    args.script = ScriptSource::Inline(text);
                }

                c => return Err(CliError::UnknownOption(c)),
            }
            j += 1;
        }
        i += 1;
    }

    let mut rest = argv[i.min(argv.len())..].iter().cloned();
    if !matches!(args.script, ScriptSource::Inline(_)) {
        args.script = match rest.next() {
            None => ScriptSource::Stdin,
            Some(s) if s == "-" => ScriptSource::Stdin,
            Some(s) => ScriptSource::File(PathBuf::from(s)),
        };
    }
    args.script_args = rest.collect();

    Ok(args)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
