//! Core BCL commands.
//!
//! Each command receives its already-substituted arguments (without the
//! command name) and returns a [`Signal`].  Names are matched
//! case-insensitively through [`lookup`].

use super::{
    error::ScriptError,
    expand::quote_word,
    expr,
    interp::{Interpreter, Signal},
    value::{parse_number, Value},
};

/// Signature shared by all built-in commands.
pub type Builtin = fn(&mut Interpreter, &[String]) -> Signal;

const BUILTINS: &[(&str, Builtin)] = &[
    ("SET", cmd_set),
    ("UNSET", cmd_unset),
    ("INCR", cmd_incr),
    ("APPEND", cmd_append),
    ("GLOBAL", cmd_global),
    ("PUTS", cmd_puts),
    ("PUTSN", cmd_putsn),
    ("EXPR", cmd_expr),
    ("IF", cmd_if),
    ("BREAK", cmd_break),
    ("CONTINUE", cmd_continue),
    ("RETURN", cmd_return),
    ("EXIT", cmd_exit),
    ("EVAL", cmd_eval),
    ("SOURCE", cmd_source),
    ("ENV", cmd_env),
    ("ARGV", cmd_argv),
];

/// Keywords that only make sense to the block parser.
const BLOCK_KEYWORDS: &[&str] = &[
    "WHILE", "FOR", "FOREACH", "SWITCH", "PROC", "ELSEIF", "ELSE", "CASE", "DEFAULT", "END",
];

/// Find a built-in by name, ignoring case.
pub fn lookup(name: &str) -> Option<Builtin> {
    BUILTINS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, f)| f)
}

/// The error for a block keyword that reached the dispatcher, for example
/// through `EVAL` or a subcommand.
pub fn block_only(name: &str) -> Option<ScriptError> {
    BLOCK_KEYWORDS
        .iter()
        .find(|kw| kw.eq_ignore_ascii_case(name))
        .map(|kw| ScriptError::argument(format!("{kw}: only valid as a multi-line block")))
}

fn usage(text: &str) -> ScriptError {
    ScriptError::argument(format!("wrong # args: should be \"{text}\""))
}

/// `%.0f` rendering, without a negative zero.
fn format_integer(n: f64) -> String {
    let s = format!("{n:.0}");
    if s == "-0" {
        "0".to_owned()
    } else {
        s
    }
}

// ── Variables ─────────────────────────────────────────────────────────────────

fn cmd_set(interp: &mut Interpreter, args: &[String]) -> Signal {
    match args {
        [name] => match interp.get_var(name) {
            Some(v) => Signal::Ok(v),
            None => interp.fail(ScriptError::runtime(format!(
                "can't read \"{name}\": no such variable"
            ))),
        },
        [name, value] => {
            let v = Value::from(value.as_str());
            interp.set_var(name, v.clone());
            Signal::Ok(v)
        }
        _ => interp.fail(ScriptError::argument(
            "SET: wrong # args: should be \"SET varname ?value?\"",
        )),
    }
}

fn cmd_unset(interp: &mut Interpreter, args: &[String]) -> Signal {
    let [name] = args else {
        return interp.fail(ScriptError::argument(
            "UNSET: wrong # args: should be \"UNSET varname\"",
        ));
    };
    interp.unset_var(name);
    Signal::empty()
}

fn cmd_incr(interp: &mut Interpreter, args: &[String]) -> Signal {
    let (name, amount) = match args {
        [name] => (name, None),
        [name, amount] => (name, Some(amount)),
        _ => {
            return interp.fail(ScriptError::argument(
                "INCR: wrong # args: should be \"INCR varname ?increment?\"",
            ))
        }
    };
    let not_integer = |s: &str| ScriptError::runtime(format!("expected integer but got \"{s}\""));

    let increment = match amount {
        None => 1.0,
        Some(a) => match parse_number(a) {
            Some(n) => n,
            None => return interp.fail(not_integer(a)),
        },
    };
    let current = match interp.get_var(name) {
        None => 0.0,
        Some(v) => match v.to_number() {
            Some(n) => n,
            None => return interp.fail(not_integer(v.as_str())),
        },
    };

    let result = Value::new(format_integer(current + increment));
    interp.set_var(name, result.clone());
    Signal::Ok(result)
}

fn cmd_append(interp: &mut Interpreter, args: &[String]) -> Signal {
    let Some((name, values)) = args.split_first() else {
        return interp.fail(ScriptError::argument(
            "APPEND: wrong # args: should be \"APPEND varname ?value ...?\"",
        ));
    };
    let mut text = interp
        .get_var(name)
        .map(|v| v.as_str().to_owned())
        .unwrap_or_default();
    for v in values {
        text.push_str(v);
    }
    let result = Value::from(text);
    interp.set_var(name, result.clone());
    Signal::Ok(result)
}

fn cmd_global(interp: &mut Interpreter, args: &[String]) -> Signal {
    if args.is_empty() {
        return interp.fail(ScriptError::argument(
            "GLOBAL: wrong # args: should be \"GLOBAL varName ?varName ...?\"",
        ));
    }
    for name in args {
        interp.scopes.declare_global(name);
    }
    Signal::empty()
}

// ── Output and expressions ────────────────────────────────────────────────────

fn cmd_puts(interp: &mut Interpreter, args: &[String]) -> Signal {
    let mut line = args.join(" ");
    line.push('\n');
    interp.write_output(&line);
    Signal::empty()
}

fn cmd_putsn(interp: &mut Interpreter, args: &[String]) -> Signal {
    interp.write_output(&args.join(" "));
    Signal::empty()
}

fn cmd_expr(interp: &mut Interpreter, args: &[String]) -> Signal {
    if args.is_empty() {
        return interp.fail(usage("EXPR expression"));
    }
    Signal::Ok(expr::eval_str(&args.join(" ")))
}

// ── Control flow ──────────────────────────────────────────────────────────────

/// One arm of a single-line `IF`: its condition (`None` for `ELSE`) and body.
struct InlineArm<'a> {
    cond: Option<&'a [String]>,
    body: &'a [String],
}

fn is_kw(word: &str, kw: &str) -> bool {
    word.eq_ignore_ascii_case(kw)
}

/// Split `cond THEN body [ELSEIF cond THEN body]... [ELSE body] END` into
/// arms.  Nested single-line `IF ... END` inside a body is kept intact.
fn parse_inline_if(args: &[String]) -> Result<Vec<InlineArm<'_>>, ScriptError> {
    let mut arms = Vec::new();
    let mut pos = 0;
    let mut cond: Option<&[String]> = None;
    let mut expect_cond = true;

    loop {
        if expect_cond {
            let then = args[pos..]
                .iter()
                .position(|w| is_kw(w, "THEN"))
                .ok_or_else(|| ScriptError::argument("IF: missing THEN keyword"))?;
            cond = Some(&args[pos..pos + then]);
            pos += then + 1;
        }

        let start = pos;
        let mut depth = 0usize;
        let stop = loop {
            let Some(word) = args.get(pos) else {
                return Err(ScriptError::argument("IF: missing END keyword"));
            };
            if is_kw(word, "IF") {
                depth += 1;
            } else if is_kw(word, "END") {
                if depth == 0 {
                    break word;
                }
                depth -= 1;
            } else if depth == 0 && (is_kw(word, "ELSEIF") || is_kw(word, "ELSE")) {
                break word;
            }
            pos += 1;
        };
        arms.push(InlineArm { cond, body: &args[start..pos] });
        pos += 1;

        if is_kw(stop, "END") {
            return Ok(arms);
        }
        expect_cond = is_kw(stop, "ELSEIF");
        cond = None;
    }
}

fn cmd_if(interp: &mut Interpreter, args: &[String]) -> Signal {
    if args.len() < 3 {
        return interp.fail(ScriptError::argument(
            "IF: wrong # args: should be \"IF condition THEN command ?ELSEIF condition THEN command ...? ?ELSE command? END\"",
        ));
    }
    let arms = match parse_inline_if(args) {
        Ok(arms) => arms,
        Err(e) => return interp.fail(e),
    };
    for arm in arms {
        let taken = match arm.cond {
            None => true,
            Some(cond) => match interp.condition_holds(&cond.join(" ")) {
                Ok(taken) => taken,
                Err(sig) => return sig,
            },
        };
        if taken {
            if arm.body.is_empty() {
                return Signal::empty();
            }
            let command: Vec<String> = arm.body.iter().map(|w| quote_word(w)).collect();
            return interp.eval(&command.join(" "));
        }
    }
    Signal::empty()
}

fn cmd_break(_: &mut Interpreter, _: &[String]) -> Signal {
    Signal::Break
}

fn cmd_continue(_: &mut Interpreter, _: &[String]) -> Signal {
    Signal::Continue
}

fn cmd_return(_: &mut Interpreter, args: &[String]) -> Signal {
    Signal::Return(Value::from(args.join(" ")))
}

fn cmd_exit(interp: &mut Interpreter, args: &[String]) -> Signal {
    let code = match args.first() {
        None => 0,
        Some(a) => match parse_number(a) {
            Some(n) => n as i32,
            None => {
                return interp.fail(ScriptError::runtime(format!(
                    "expected integer but got \"{a}\""
                )))
            }
        },
    };
    interp.record_exit(code);
    Signal::Exit(code)
}

// ── Evaluation and environment ────────────────────────────────────────────────

fn cmd_eval(interp: &mut Interpreter, args: &[String]) -> Signal {
    if args.is_empty() {
        return interp.fail(usage("EVAL code"));
    }
    match interp.eval(&args.join(" ")) {
        Signal::Return(v) => Signal::Ok(v),
        other => other,
    }
}

fn cmd_source(interp: &mut Interpreter, args: &[String]) -> Signal {
    let [path] = args else {
        return interp.fail(usage("SOURCE filename"));
    };
    match interp.eval_file(path) {
        Signal::Return(v) => Signal::Ok(v),
        Signal::Ok(_) | Signal::Break | Signal::Continue => Signal::empty(),
        other => other,
    }
}

fn cmd_env(interp: &mut Interpreter, args: &[String]) -> Signal {
    let [name] = args else {
        return interp.fail(usage("ENV varname"));
    };
    Signal::Ok(Value::from(std::env::var(name).unwrap_or_default()))
}

fn cmd_argv(interp: &mut Interpreter, _: &[String]) -> Signal {
    Signal::Ok(Value::from(interp.script_args().join(" ")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
