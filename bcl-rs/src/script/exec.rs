//! Block executor.
//!
//! Walks a parsed [`Block`] tree.  Lines are tokenized at the moment they run,
//! so every substitution sees current variable values.  Each nested block
//! costs one level of `max_recursion`.
//!
//! | Construct | Consumes            | Propagates                        |
//! |-----------|---------------------|-----------------------------------|
//! | Sequence  | nothing             | first non-`Ok` signal             |
//! | WHILE/FOR/FOREACH | `Break`, `Continue` | `Error`, `Return`, `Exit` |
//! | IF/SWITCH | nothing             | whatever the chosen branch yields |
//! | PROC      | n/a (defines only)  | `Error` for a nameless `PROC`     |

use std::rc::Rc;

use super::{
    block::{Block, BlockKind, Item},
    error::ScriptError,
    expand::{expand_subcommands, expand_vars},
    expr,
    interp::{Interpreter, Signal},
    value::{format_number, parse_number, Value},
};

/// Reserved loop counter bound by `FOR`.
pub const FOR_COUNTER: &str = "__FOR";

/// What the loop driver should do after one pass over the body.
enum Step {
    Next,
    Stop,
    Leave(Signal),
}

fn loop_step(sig: Signal) -> Step {
    match sig {
        Signal::Ok(_) | Signal::Continue => Step::Next,
        Signal::Break => Step::Stop,
        other => Step::Leave(other),
    }
}

/// Parse the substituted words of `start TO end ?STEP step?`.
fn for_range(words: &[String]) -> Result<(f64, f64, f64), ScriptError> {
    let usage = || ScriptError::argument("FOR: expected \"start TO end ?STEP step?\"");
    let keyword = |i: usize, kw: &str| words.get(i).is_some_and(|w| w.eq_ignore_ascii_case(kw));

    let step_text = match words.len() {
        3 if keyword(1, "TO") => None,
        5 if keyword(1, "TO") && keyword(3, "STEP") => Some(words[4].as_str()),
        _ => return Err(usage()),
    };
    let number = |s: &str| {
        parse_number(s)
            .ok_or_else(|| ScriptError::argument(format!("FOR: expected number but got \"{s}\"")))
    };
    let start = number(&words[0])?;
    let end = number(&words[2])?;
    let step = step_text.map(number).transpose()?.unwrap_or(1.0);
    Ok((start, end, step))
}

impl Interpreter {
    /// Execute a block and return its signal.
    pub fn execute(&mut self, block: &Block) -> Signal {
        match block.kind {
            BlockKind::Sequence | BlockKind::Else | BlockKind::Case | BlockKind::Default => {
                self.run_items(&block.items)
            }
            BlockKind::If | BlockKind::ElseIf => self.exec_if(block),
            BlockKind::While => self.exec_while(block),
            BlockKind::For => self.exec_for(block),
            BlockKind::ForEach => self.exec_foreach(block),
            BlockKind::Switch => self.exec_switch(block),
            BlockKind::Proc => self.exec_proc(block),
        }
    }

    fn run_items(&mut self, items: &[Item]) -> Signal {
        let mut last = Value::empty();
        for item in items {
            let sig = match item {
                Item::Line(line) => match self.words(line) {
                    Ok(argv) if argv.is_empty() => continue,
                    Ok(argv) => self.dispatch(&argv),
                    Err(sig) => return sig,
                },
                Item::Block(block) => self.guarded(|interp| interp.execute(block)),
            };
            match sig {
                Signal::Ok(v) => last = v,
                other => return other,
            }
        }
        Signal::Ok(last)
    }

    /// Truthiness of an `IF`/`ELSEIF`/`WHILE` condition.  `Err` carries a
    /// signal from a subcommand in the condition that ends the script.
    pub(crate) fn condition_holds(&mut self, cond: &str) -> Result<bool, Signal> {
        if cond.trim().is_empty() {
            return Ok(false);
        }
        let text = expand_subcommands(cond, self);
        if let Some(sig) = self.take_pending() {
            return Err(sig);
        }
        let text = expand_vars(&text, &*self);
        Ok(expr::eval_str(&text).is_truthy())
    }

    fn exec_if(&mut self, block: &Block) -> Signal {
        let branches = std::iter::once(block).chain(&block.siblings);
        for branch in branches {
            let taken = match branch.kind {
                BlockKind::If | BlockKind::ElseIf => match self.condition_holds(&branch.condition) {
                    Ok(taken) => taken,
                    Err(sig) => return sig,
                },
                BlockKind::Else => true,
                _ => false,
            };
            if taken {
                return self.run_items(&branch.items);
            }
        }
        Signal::empty()
    }

    fn exec_while(&mut self, block: &Block) -> Signal {
        loop {
            match self.condition_holds(&block.condition) {
                Ok(true) => {}
                Ok(false) => break,
                Err(sig) => return sig,
            }
            match loop_step(self.run_items(&block.items)) {
                Step::Next => {}
                Step::Stop => break,
                Step::Leave(sig) => return sig,
            }
        }
        Signal::empty()
    }

    fn exec_for(&mut self, block: &Block) -> Signal {
        let words = match self.words(&block.condition) {
            Ok(words) => words,
            Err(sig) => return sig,
        };
        let (start, end, step) = match for_range(&words) {
            Ok(range) => range,
            Err(e) => return self.fail(e),
        };
        let mut i = start;
        while (step > 0.0 && i <= end) || (step < 0.0 && i >= end) {
            self.set_var(FOR_COUNTER, Value::new(format_number(i)));
            match loop_step(self.run_items(&block.items)) {
                Step::Next => {}
                Step::Stop => break,
                Step::Leave(sig) => return sig,
            }
            i += step;
        }
        Signal::empty()
    }

    fn exec_foreach(&mut self, block: &Block) -> Signal {
        let header = block.condition.trim();
        let (var, rest) = header
            .split_once(char::is_whitespace)
            .map_or((header, ""), |(v, r)| (v, r.trim_start()));
        if var.is_empty() {
            return self.fail(ScriptError::argument("FOREACH: missing loop variable"));
        }
        let list = match rest.split_once(char::is_whitespace) {
            Some((kw, tail)) if kw.eq_ignore_ascii_case("IN") => tail.trim(),
            _ if rest.eq_ignore_ascii_case("IN") => "",
            _ => rest,
        };

        let elements: Vec<String> = if list.starts_with('$') && !list.contains(char::is_whitespace) {
            expand_vars(list, &*self)
                .split_whitespace()
                .map(str::to_owned)
                .collect()
        } else {
            match self.words(list) {
                Ok(words) => words
                    .iter()
                    .flat_map(|t| t.split_whitespace())
                    .map(str::to_owned)
                    .collect(),
                Err(sig) => return sig,
            }
        };

        for element in elements {
            self.set_var(var, Value::from(element));
            match loop_step(self.run_items(&block.items)) {
                Step::Next => {}
                Step::Stop => break,
                Step::Leave(sig) => return sig,
            }
        }
        Signal::empty()
    }

    fn exec_switch(&mut self, block: &Block) -> Signal {
        let subject = expand_vars(&block.condition, &*self);
        for arm in &block.siblings {
            if arm.kind == BlockKind::Case && expand_vars(&arm.condition, &*self) == subject {
                return self.run_items(&arm.items);
            }
        }
        match block.siblings.iter().find(|b| b.kind == BlockKind::Default) {
            Some(default) => self.run_items(&default.items),
            None => Signal::empty(),
        }
    }

    fn exec_proc(&mut self, block: &Block) -> Signal {
        match &block.proc_def {
            Some(def) if !def.name.is_empty() => {
                self.define_proc(&def.name, def.params.clone(), Rc::clone(&def.body));
                Signal::empty()
            }
            _ => self.fail(ScriptError::argument("PROC: missing procedure name")),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
