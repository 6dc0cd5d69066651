use std::io::Read;
use std::path::Path;
use std::process::ExitCode;

use bcl::cli::{self, ConfigFile, ScriptSource};
use bcl::config::{self, Config};
use bcl::logging;
use bcl::script::Interpreter;

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("bcl: {e}");
            eprintln!("{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    logging::init_tracing(args.debug);

    // ── Configuration: defaults, rc file, environment, flags ────────────────
    let rc = match &args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(path) => Some(path.clone()),
        ConfigFile::Search => config::find_user_config(),
    };
    let mut config = rc.map_or_else(Config::default, |path| load_rc(&path));
    for e in config.apply_env() {
        tracing::warn!("{e}");
    }
    if args.strict {
        config.strict_blocks = true;
    }
    tracing::debug!(?config, "configuration loaded");

    let mut interp = Interpreter::with_config(config);
    interp.set_script_args(args.script_args);

    // ── Run ──────────────────────────────────────────────────────────────────
    let result = match args.script {
        ScriptSource::Inline(text) => interp.run(&text),
        ScriptSource::File(path) => interp.run_file(&path.to_string_lossy()),
        ScriptSource::Stdin => {
            let mut text = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut text) {
                eprintln!("Error: couldn't read standard input: {e}");
                return ExitCode::from(1);
            }
            interp.run(&text)
        }
    };

    match result {
        Ok(_) => exit_status(interp.exit_code().unwrap_or(0)),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Defaults overlaid with the settings in `path`.  An unreadable file only
/// costs a warning.
fn load_rc(path: &Path) -> Config {
    match Config::load_file(path) {
        Ok((config, errors)) => {
            for e in errors {
                tracing::warn!(file = %path.display(), "{e}");
            }
            config
        }
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "config file not loaded");
            Config::default()
        }
    }
}

/// Process exit statuses are a byte; `EXIT 256` wraps like a shell.
fn exit_status(code: i32) -> ExitCode {
    ExitCode::from((code & 0xff) as u8)
}
