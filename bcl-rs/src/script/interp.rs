//! BCL interpreter.
//!
//! The [`Interpreter`] owns the scope stack, the procedure table and the
//! extension-command registry.  Scripts run in one of two modes:
//!
//! - **structured** ([`Interpreter::eval_structured`], [`Interpreter::run`]):
//!   the text is parsed into a [`Block`] tree first and then walked by the
//!   executor, so multi-line `IF`/`WHILE`/`PROC` constructs work;
//! - **flat** ([`Interpreter::eval`]): each line is tokenized and dispatched
//!   directly.  Subcommands, `EVAL` and single-line `IF` branches use this.
//!
//! Every unit of execution produces a [`Signal`].  Errors never unwind; they
//! are carried as [`Signal::Error`] and remembered as the last error.
//!
//! A subcommand normally reduces to its text, or to `""` when it fails.  Two
//! outcomes must still end the enclosing script: `EXIT`, and running out of
//! nesting depth.  Those are parked in a pending slot while the line finishes
//! tokenizing and are returned in place of running the line.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::config::Config;

use super::{
    block::{parse_script_with, Block, Param},
    builtins,
    error::ScriptError,
    expand::{self, EvalContext},
    scope::ScopeStack,
    value::Value,
};

// ── Signal ────────────────────────────────────────────────────────────────────

/// Outcome of executing a line, block, command or procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Ok(Value),
    Error(String),
    Break,
    Continue,
    Return(Value),
    Exit(i32),
}

impl Signal {
    pub fn ok(value: impl Into<Value>) -> Self {
        Signal::Ok(value.into())
    }

    pub fn empty() -> Self {
        Signal::Ok(Value::empty())
    }
}

impl From<ScriptError> for Signal {
    fn from(err: ScriptError) -> Self {
        Signal::Error(err.to_string())
    }
}

// ── Procedures and extensions ─────────────────────────────────────────────────

/// A user-defined procedure.  The body is shared with the `PROC` block that
/// defined it.
#[derive(Debug)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Rc<Block>,
}

impl Procedure {
    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    /// `name p1 ?p2?`, as shown in arity errors.
    pub fn usage(&self) -> String {
        let mut s = self.name.clone();
        for p in &self.params {
            s.push(' ');
            if p.optional {
                s.push('?');
                s.push_str(&p.name);
                s.push('?');
            } else {
                s.push_str(&p.name);
            }
        }
        s
    }
}

/// A host-registered command.
pub type CommandFn = Rc<dyn Fn(&mut Interpreter, &[String]) -> Signal>;

enum Output {
    Stdout,
    Capture(String),
}

// ── Stack growth ──────────────────────────────────────────────────────────────

/// Keep at least this much native stack free before recursing.
const RED_ZONE: usize = 100 * 1024;

/// Size of each new stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter {
    pub(crate) scopes: ScopeStack,
    procs: HashMap<String, Rc<Procedure>>,
    extensions: HashMap<String, CommandFn>,
    config: Config,
    /// Nested evaluations currently on the stack.
    depth: usize,
    /// Set once `max_recursion` is hit; cleared by the next top-level run.
    limit_hit: bool,
    /// Signal raised inside a subcommand that ends the whole script.
    pending: Option<Signal>,
    last_error: Option<String>,
    exit_code: Option<i32>,
    script_args: Vec<String>,
    output: Output,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("procs", &self.procs.len())
            .field("extensions", &self.extensions.len())
            .field("depth", &self.depth)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Interpreter {
            scopes: ScopeStack::new(config.max_scope_depth),
            procs: HashMap::new(),
            extensions: HashMap::new(),
            config,
            depth: 0,
            limit_hit: false,
            pending: None,
            last_error: None,
            exit_code: None,
            script_args: Vec::new(),
            output: Output::Stdout,
        }
    }

    /// Collect `PUTS` output in memory instead of writing to stdout.
    pub fn with_captured_output(mut self) -> Self {
        self.output = Output::Capture(String::new());
        self
    }

    /// Drain captured output.  Always empty when writing to stdout.
    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            Output::Capture(buf) => std::mem::take(buf),
            Output::Stdout => String::new(),
        }
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        match &mut self.output {
            Output::Capture(buf) => buf.push_str(text),
            Output::Stdout => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
                    tracing::debug!(error = %e, "stdout write failed");
                }
            }
        }
    }

    pub fn set_script_args(&mut self, args: Vec<String>) {
        self.script_args = args;
    }

    pub fn script_args(&self) -> &[String] {
        &self.script_args
    }

    /// Message of the most recent error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Code passed to the last `EXIT`, if one ran.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub(crate) fn record_exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    /// Keep the message of an error signal produced outside [`Self::fail`].
    fn remember(&mut self, sig: Signal) -> Signal {
        if let Signal::Error(msg) = &sig {
            self.last_error = Some(msg.clone());
        }
        sig
    }

    /// Record `err` as the last error and turn it into a signal.
    pub(crate) fn fail(&mut self, err: ScriptError) -> Signal {
        let msg = err.to_string();
        tracing::debug!(error = %msg, "script error");
        self.last_error = Some(msg.clone());
        Signal::Error(msg)
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.scopes.get(name).cloned()
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) {
        self.scopes.set(name, value.into());
    }

    pub fn unset_var(&mut self, name: &str) -> bool {
        self.scopes.unset(name)
    }

    pub fn var_exists(&self, name: &str) -> bool {
        self.scopes.exists(name)
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Register a host command.  Built-ins and procedures with the same name
    /// take precedence.
    pub fn register_command<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut Interpreter, &[String]) -> Signal + 'static,
    {
        self.extensions.insert(name.to_ascii_lowercase(), Rc::new(f));
    }

    /// Define or replace a procedure.
    pub fn define_proc(&mut self, name: &str, params: Vec<Param>, body: Rc<Block>) {
        tracing::debug!(proc = name, params = params.len(), "define procedure");
        let proc = Procedure { name: name.to_owned(), params, body };
        self.procs.insert(name.to_ascii_lowercase(), Rc::new(proc));
    }

    pub fn proc_exists(&self, name: &str) -> bool {
        self.procs.contains_key(&name.to_ascii_lowercase())
    }

    /// Run one command.  `argv[0]` is the command name.
    pub fn dispatch(&mut self, argv: &[String]) -> Signal {
        let Some((name, args)) = argv.split_first() else {
            return Signal::empty();
        };
        tracing::trace!(command = %name, argc = args.len(), "dispatch");

        if let Some(f) = builtins::lookup(name) {
            let sig = f(self, args);
            return self.remember(sig);
        }
        if let Some(err) = builtins::block_only(name) {
            return self.fail(err);
        }
        let key = name.to_ascii_lowercase();
        if let Some(proc) = self.procs.get(&key).cloned() {
            return self.call_proc(&proc, args);
        }
        if let Some(f) = self.extensions.get(&key).cloned() {
            let sig = f(self, args);
            return self.remember(sig);
        }
        self.fail(ScriptError::UnknownCommand(name.clone()))
    }

    /// Invoke a procedure with positional arguments.
    pub fn call_proc(&mut self, proc: &Procedure, args: &[String]) -> Signal {
        if args.len() < proc.required() {
            let msg = format!("wrong # args: should be \"{}\"", proc.usage());
            return self.fail(ScriptError::Argument(msg));
        }
        if let Err(e) = self.scopes.push(&proc.name) {
            return self.fail(e);
        }
        for (param, arg) in proc.params.iter().zip(args) {
            self.scopes.set(&param.name, Value::from(arg.as_str()));
        }

        let body = Rc::clone(&proc.body);
        let sig = self.guarded(|interp| interp.execute(&body));
        self.scopes.pop();

        match sig {
            Signal::Return(v) => Signal::Ok(v),
            Signal::Error(_) | Signal::Exit(_) => sig,
            Signal::Ok(_) | Signal::Break | Signal::Continue => Signal::empty(),
        }
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// Bump the nesting depth around `f`, failing once the configured limit
    /// is reached.
    pub(crate) fn guarded(&mut self, f: impl FnOnce(&mut Self) -> Signal) -> Signal {
        if self.depth == 0 {
            self.limit_hit = false;
        }
        let limit = self.config.max_recursion;
        if self.depth >= limit {
            self.limit_hit = true;
            return self.fail(ScriptError::RecursionLimit(limit));
        }
        self.depth += 1;
        let sig = ensure_sufficient_stack(|| f(self));
        self.depth -= 1;
        sig
    }

    /// Flat evaluation: every line is one command.
    pub fn eval(&mut self, src: &str) -> Signal {
        self.guarded(|interp| interp.eval_lines(src))
    }

    fn eval_lines(&mut self, src: &str) -> Signal {
        let mut last = Value::empty();
        for line in src.split('\n') {
            let argv = match self.words(line) {
                Ok(argv) => argv,
                Err(sig) => return sig,
            };
            if argv.is_empty() {
                continue;
            }
            match self.dispatch(&argv) {
                Signal::Ok(v) => last = v,
                other => return other,
            }
        }
        Signal::Ok(last)
    }

    /// Tokenize one line.  `Err` carries a signal raised by one of its
    /// subcommands that must end the script instead of running the line.
    pub(crate) fn words(&mut self, line: &str) -> Result<Vec<String>, Signal> {
        let argv = expand::tokenize_line(line, self);
        self.take_pending().map_or(Ok(argv), Err)
    }

    pub(crate) fn take_pending(&mut self) -> Option<Signal> {
        self.pending.take()
    }

    fn parse(&self, src: &str) -> Result<Block, ScriptError> {
        parse_script_with(src, self.config.max_recursion, self.config.strict_blocks)
    }

    /// Structured evaluation: parse into blocks, then execute.
    pub fn eval_structured(&mut self, src: &str) -> Signal {
        match self.parse(src) {
            Ok(root) => self.execute(&root),
            Err(e) => self.fail(e),
        }
    }

    /// Read a file and evaluate it structurally.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn eval_file(&mut self, path: &str) -> Signal {
        match std::fs::read_to_string(path) {
            Ok(src) => self.guarded(|interp| interp.eval_structured(&src)),
            Err(e) => self.fail(ScriptError::file(path, &e)),
        }
    }

    /// Run a whole script as a top-level unit.
    ///
    /// `RETURN` at top level yields its value; a stray `BREAK` or `CONTINUE`
    /// ends the script normally.  After `EXIT`, the code is available from
    /// [`Interpreter::exit_code`].
    pub fn run(&mut self, src: &str) -> Result<Value, ScriptError> {
        self.limit_hit = false;
        self.pending = None;
        let root = self.parse(src).map_err(|e| self.record(e))?;
        let sig = self.execute(&root);
        self.complete(sig)
    }

    /// [`Interpreter::run`] for a file on disk.
    pub fn run_file(&mut self, path: &str) -> Result<Value, ScriptError> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| self.record(ScriptError::file(path, &e)))?;
        self.run(&src)
    }

    fn record(&mut self, err: ScriptError) -> ScriptError {
        self.last_error = Some(err.to_string());
        err
    }

    /// Map a top-level signal to the caller-facing result.
    fn complete(&mut self, sig: Signal) -> Result<Value, ScriptError> {
        match sig {
            Signal::Ok(v) | Signal::Return(v) => Ok(v),
            Signal::Break | Signal::Continue => Ok(Value::empty()),
            Signal::Exit(code) => {
                self.exit_code = Some(code);
                Ok(Value::empty())
            }
            Signal::Error(msg) => Err(self.record(ScriptError::Runtime(msg))),
        }
    }
}

// ── EvalContext impl ──────────────────────────────────────────────────────────

impl EvalContext for Interpreter {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.scopes.get(name).cloned()
    }

    fn eval_subcommand(&mut self, src: &str) -> Option<String> {
        match self.eval(src) {
            Signal::Ok(v) => Some(v.as_str().to_owned()),
            sig @ Signal::Exit(_) => {
                self.pending = Some(sig);
                None
            }
            sig @ Signal::Error(_) if self.limit_hit => {
                self.pending = Some(sig);
                None
            }
            _ => None,
        }
    }

    fn unwinding(&self) -> bool {
        self.pending.is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn interp() -> Interpreter {
        Interpreter::new().with_captured_output()
    }

    fn output(src: &str) -> String {
        let mut interp = interp();
        interp.run(src).expect("script failed");
        interp.take_output()
    }

    #[test]
    fn flat_eval_returns_last_value() {
        let mut i = interp();
        assert_eq!(i.eval("SET a 1\nSET b 2"), Signal::ok("2"));
        assert_eq!(i.get_var("A"), Some(Value::from("1")));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let mut i = interp();
        assert_eq!(i.eval("FROB 1"), Signal::Error("invalid command name \"FROB\"".into()));
        assert_eq!(i.last_error(), Some("invalid command name \"FROB\""));
    }

    #[test]
    fn subcommand_substitution() {
        assert_eq!(output("SET x [EXPR 2 + 3]\nPUTS $x"), "5\n");
    }

    #[test]
    fn failed_subcommand_substitutes_empty() {
        assert_eq!(output("PUTS <[NOPE]>"), "<>\n");
    }

    #[test]
    fn extension_commands_are_dispatched() {
        let mut i = interp();
        i.register_command("double", |_, args| {
            let n = args.first().and_then(|a| a.parse::<i64>().ok()).unwrap_or(0);
            Signal::ok((n * 2).to_string())
        });
        assert_eq!(i.eval("DOUBLE 21"), Signal::ok("42"));
    }

    #[test]
    fn procedure_arity_error_shows_usage() {
        let mut i = interp();
        let err = i.run("PROC f WITH a @b DO\nRETURN $a\nEND\nf").unwrap_err();
        assert_eq!(err.to_string(), "wrong # args: should be \"f a ?b?\"");
        assert_eq!(i.scopes.depth(), 0);
    }

    #[test]
    fn return_value_becomes_call_result() {
        let src = "PROC add WITH a b DO\nRETURN [EXPR $a + $b]\nEND\nPUTS [add 2 3]";
        assert_eq!(output(src), "5\n");
    }

    #[test]
    fn top_level_break_is_normal_termination() {
        let mut i = interp();
        assert_eq!(i.run("PUTS a\nBREAK\nPUTS b"), Ok(Value::empty()));
        assert_eq!(i.take_output(), "a\n");
    }

    #[test]
    fn exit_records_code() {
        let mut i = interp();
        i.run("EXIT 3\nPUTS unreachable").unwrap();
        assert_eq!(i.exit_code(), Some(3));
        assert_eq!(i.take_output(), "");
    }

    #[test]
    fn recursion_limit_is_recoverable() {
        let mut i = Interpreter::with_config(Config { max_recursion: 50, ..Config::default() })
            .with_captured_output();
        let err = i.run("PROC loop DO\nloop\nEND\nloop").unwrap_err();
        assert!(err.to_string().contains("recursion"), "{err}");
        assert_eq!(i.scopes.depth(), 0);
        assert_eq!(i.run("PUTS still alive"), Ok(Value::from("")));
        assert_eq!(i.take_output(), "still alive\n");
    }

    #[test]
    fn scope_depth_limit() {
        let cfg = Config { max_scope_depth: 5, ..Config::default() };
        let mut i = Interpreter::with_config(cfg).with_captured_output();
        let err = i.run("PROC deep DO\ndeep\nEND\ndeep").unwrap_err();
        assert_eq!(err.to_string(), "Maximum scope depth exceeded");
    }

    #[test]
    fn extension_errors_are_remembered() {
        let mut i = interp();
        i.register_command("boom", |_, _| Signal::Error("boom failed".into()));
        assert_eq!(i.run("boom"), Err(ScriptError::Runtime("boom failed".into())));
        assert_eq!(i.last_error(), Some("boom failed"));
    }

    #[test]
    fn unreadable_file_is_remembered() {
        let mut i = interp();
        assert!(i.run_file("/no/such/dir/script.bcl").is_err());
        assert_eq!(
            i.last_error(),
            Some("couldn't read file \"/no/such/dir/script.bcl\": no such file or directory")
        );
    }

    #[test]
    fn exit_inside_subcommand_ends_the_script() {
        let mut i = interp();
        assert_eq!(i.run("PUTS [EXIT 3]\nPUTS after"), Ok(Value::empty()));
        assert_eq!(i.exit_code(), Some(3));
        assert_eq!(i.take_output(), "");
    }

    #[test]
    fn exit_inside_nested_subcommand_skips_later_brackets() {
        let mut i = interp();
        i.run("PROC quit DO\nSET x [EXIT 5]\nPUTS inside\nEND\nPUTS [quit] [PUTS later]\nPUTS after")
            .unwrap();
        assert_eq!(i.exit_code(), Some(5));
        assert_eq!(i.take_output(), "");
    }

    #[test]
    fn deeply_nested_blocks_are_an_error() {
        let depth = 10_000;
        let src = format!(
            "{}BREAK\n{}",
            "WHILE 1 DO\nIF 1 THEN\n".repeat(depth),
            "END\nEND\n".repeat(depth)
        );
        let mut i = interp();
        let err = i.run(&src).unwrap_err();
        assert!(err.to_string().contains("recursion"), "{err}");
        assert_eq!(i.run("PUTS fine"), Ok(Value::empty()));
        assert_eq!(i.take_output(), "fine\n");
    }

    #[test]
    fn nested_blocks_count_towards_the_limit() {
        let cfg = Config { max_recursion: 8, ..Config::default() };
        let nest = |n: usize| format!("{}PUTS deep\n{}", "IF 1 THEN\n".repeat(n), "END\n".repeat(n));
        let mut i = Interpreter::with_config(cfg).with_captured_output();
        assert_eq!(i.run(&nest(4)), Ok(Value::empty()));
        assert_eq!(i.take_output(), "deep\n");
        let err = i.run(&nest(9)).unwrap_err();
        assert_eq!(err, ScriptError::RecursionLimit(8));
        assert_eq!(i.take_output(), "");
    }

    #[test]
    fn deeply_nested_brackets_are_an_error() {
        let nest = |n: usize| format!("PUTS [{}EXPR 1{}]", "SET x [".repeat(n), "]".repeat(n));
        let cfg = Config { max_recursion: 50, ..Config::default() };
        let mut i = Interpreter::with_config(cfg).with_captured_output();
        assert_eq!(i.run(&nest(10)), Ok(Value::empty()));
        assert_eq!(i.take_output(), "1\n");

        let err = i.run(&format!("{}\nPUTS after", nest(2000))).unwrap_err();
        assert!(err.to_string().contains("recursion"), "{err}");
        assert_eq!(i.take_output(), "");
        assert_eq!(i.run("PUTS [NOPE]<>"), Ok(Value::empty()));
        assert_eq!(i.take_output(), "<>\n");
    }

    #[test]
    fn strict_mode_rejects_stray_end() {
        let cfg = Config { strict_blocks: true, ..Config::default() };
        let mut i = Interpreter::with_config(cfg).with_captured_output();
        let err = i.run("PUTS a\nEND").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 2, .. }));
        assert_eq!(i.take_output(), "");
    }
}
