//! BCL line tokenizer and substitution.
//!
//! Turns one raw source line into the argument vector handed to the
//! dispatcher.  The passes run in a fixed order:
//!
//! | Pass | Sequence            | Effect                                        |
//! |------|---------------------|-----------------------------------------------|
//! | 1    | leading `#`         | Whole line is a comment, no arguments         |
//! | 2    | `[cmd ...]`         | Evaluate `cmd`, splice the result in place    |
//! | 3    | `"..."` / `'...'`   | Split into raw tokens, quotes removed         |
//! | 4    | `\n` `\t` `\"` ...  | Decode escapes (double-quoted and bare only)  |
//! | 5    | `$name`, `$a(idx)`  | Substitute variables, unknown ones become ""  |
//!
//! Subcommand results are re-quoted with [`quote_word`] so they survive
//! pass 3 as a single argument.

use super::value::Value;

/// What the tokenizer needs from the interpreter.
pub trait EvalContext {
    /// Look up a variable through the normal scope rules.
    fn get_var(&self, name: &str) -> Option<Value>;
    /// Evaluate the body of a bracketed subcommand, brackets nested inside
    /// it included.  `None` means it failed; the caller substitutes the empty
    /// string.
    fn eval_subcommand(&mut self, src: &str) -> Option<String>;
    /// True once a subcommand has asked to end the whole script.  Remaining
    /// brackets on the line are then skipped.
    fn unwinding(&self) -> bool {
        false
    }
}

/// True when the first non-blank character of `line` is `#`.
pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// ── Pass 2: subcommands ───────────────────────────────────────────────────────

/// Replace every `[...]` in `src` with the result of evaluating its body.
///
/// The body of a bracket goes to the context as written, so brackets nested
/// inside it run when the context tokenizes it.  An unterminated bracket
/// runs to the end of the input.  `\[` is left alone for regex users.
pub fn expand_subcommands<C: EvalContext + ?Sized>(src: &str, ctx: &mut C) -> String {
    if !src.contains('[') {
        return src.to_owned();
    }
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                out.push('\\');
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '[' => {
                let mut body = String::new();
                let mut depth = 1usize;
                for c in chars.by_ref() {
                    match c {
                        '[' => depth += 1,
                        ']' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    body.push(c);
                }
                if ctx.unwinding() {
                    continue;
                }
                let result = ctx.eval_subcommand(&body).unwrap_or_default();
                if !result.is_empty() {
                    out.push_str(&quote_word(&result));
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

// ── Pass 3: splitting ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    Bare,
    Double,
    Single,
    Bracket,
}

/// A token as split from the line, before escapes and variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken {
    pub text: String,
    pub quoting: Quoting,
}

/// Split a line into raw tokens.  An unquoted `#` ends the line.
pub fn split_raw(line: &str) -> Vec<RawToken> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else { break };
        let mut text = String::new();
        let quoting = match first {
            '#' => break,
            '"' => {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            text.push('\\');
                            if let Some(next) = chars.next() {
                                text.push(next);
                            }
                        }
                        _ => text.push(c),
                    }
                }
                Quoting::Double
            }
            '\'' => {
                chars.next();
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    text.push(c);
                }
                Quoting::Single
            }
            '[' => {
                chars.next();
                let mut depth = 1usize;
                for c in chars.by_ref() {
                    match c {
                        '[' => depth += 1,
                        ']' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    text.push(c);
                }
                Quoting::Bracket
            }
            ']' => {
                // Stray closer.
                chars.next();
                continue;
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '#' | '[' | ']') {
                        break;
                    }
                    text.push(c);
                    chars.next();
                    if c == '\\' {
                        if let Some(next) = chars.next() {
                            text.push(next);
                        }
                    }
                }
                Quoting::Bare
            }
        };
        tokens.push(RawToken { text, quoting });
    }
    tokens
}

// ── Pass 4: escapes ───────────────────────────────────────────────────────────

/// Decode backslash escapes.  Regex classes (`\d \w \s` and their negations)
/// and `\[ \]` keep the backslash, as does anything unrecognised.
pub fn decode_escapes(s: &str) -> String {
    if !s.contains('\\') {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let decoded = match chars.peek().copied() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('a') => '\x07',
            Some('b') => '\x08',
            Some('f') => '\x0c',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            _ => {
                out.push('\\');
                continue;
            }
        };
        chars.next();
        out.push(decoded);
    }
    out
}

// ── Pass 5: variables ─────────────────────────────────────────────────────────

/// Substitute `$name` and `$name(index)` references.
///
/// The index may contain nested parentheses and is itself substituted before
/// the lookup, so `$grid($row)` works.
pub fn expand_vars<C: EvalContext + ?Sized>(s: &str, ctx: &C) -> String {
    if !s.contains('$') {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some(&c) if is_name_char(c) || c == '(' => {}
            _ => {
                out.push('$');
                continue;
            }
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if !is_name_char(c) {
                break;
            }
            name.push(c);
            chars.next();
        }

        if chars.peek() == Some(&'(') {
            chars.next();
            let mut index = String::new();
            let mut depth = 1usize;
            for c in chars.by_ref() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                index.push(c);
            }
            let index = expand_vars(&index, ctx);
            name = format!("{name}({index})");
        }

        if let Some(v) = ctx.get_var(&name) {
            out.push_str(v.as_str());
        }
    }
    out
}

// ── Full pipeline ─────────────────────────────────────────────────────────────

/// Tokenize one line into its final argument strings.
pub fn tokenize_line<C: EvalContext + ?Sized>(line: &str, ctx: &mut C) -> Vec<String> {
    if is_comment(line) {
        return Vec::new();
    }
    let line = expand_subcommands(line, ctx);
    split_raw(&line)
        .into_iter()
        .map(|tok| match tok.quoting {
            Quoting::Single => expand_vars(&tok.text, ctx),
            _ => expand_vars(&decode_escapes(&tok.text), ctx),
        })
        .collect()
}

/// Quote `word` so that [`tokenize_line`] reads it back as one argument.
pub fn quote_word(word: &str) -> String {
    let needs_quotes = word.is_empty()
        || word
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '\\' | '[' | ']'));
    if !needs_quotes {
        return word.to_owned();
    }
    let mut out = String::with_capacity(word.len() + 2);
    out.push('"');
    for c in word.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestCtx {
        vars: HashMap<String, Value>,
        calls: Vec<String>,
    }

    impl TestCtx {
        fn with(vars: &[(&str, &str)]) -> Self {
            TestCtx {
                vars: vars
                    .iter()
                    .map(|(k, v)| (k.to_string(), Value::from(*v)))
                    .collect(),
                calls: Vec::new(),
            }
        }
    }

    impl EvalContext for TestCtx {
        fn get_var(&self, name: &str) -> Option<Value> {
            self.vars.get(name).cloned()
        }

        fn eval_subcommand(&mut self, src: &str) -> Option<String> {
            self.calls.push(src.to_owned());
            let src = expand_subcommands(src, self);
            let mut words = src.split_whitespace();
            match words.next() {
                Some("echo") => Some(words.collect::<Vec<_>>().join(" ")),
                Some("fail") => None,
                _ => Some(format!("<{src}>")),
            }
        }
    }

    fn tok(line: &str, ctx: &mut TestCtx) -> Vec<String> {
        tokenize_line(line, ctx)
    }

    #[test]
    fn plain_words() {
        let mut ctx = TestCtx::default();
        assert_eq!(tok("PUTS hello   world", &mut ctx), ["PUTS", "hello", "world"]);
    }

    #[test]
    fn comment_lines_yield_nothing() {
        let mut ctx = TestCtx::default();
        assert!(tok("   # just a note", &mut ctx).is_empty());
        assert_eq!(tok("PUTS a # trailing", &mut ctx), ["PUTS", "a"]);
    }

    #[test]
    fn double_quotes_group_and_decode() {
        let mut ctx = TestCtx::default();
        assert_eq!(tok(r#"PUTS "a b\tc""#, &mut ctx), ["PUTS", "a b\tc"]);
        assert_eq!(tok(r#"PUTS "say \"hi\"""#, &mut ctx), ["PUTS", "say \"hi\""]);
        assert_eq!(tok(r#"PUTS """#, &mut ctx), ["PUTS", ""]);
    }

    #[test]
    fn single_quotes_are_literal() {
        let mut ctx = TestCtx::default();
        assert_eq!(tok(r"PUTS 'a\nb # c'", &mut ctx), ["PUTS", r"a\nb # c"]);
    }

    #[test]
    fn variables_expand_in_any_token() {
        let mut ctx = TestCtx::with(&[("name", "Ada"), ("arr(2)", "two"), ("i", "2")]);
        assert_eq!(tok("PUTS $name", &mut ctx), ["PUTS", "Ada"]);
        assert_eq!(tok(r#"PUTS "hi $name!""#, &mut ctx), ["PUTS", "hi Ada!"]);
        assert_eq!(tok("PUTS $arr($i)", &mut ctx), ["PUTS", "two"]);
        assert_eq!(tok("PUTS <$missing>", &mut ctx), ["PUTS", "<>"]);
    }

    #[test]
    fn lone_dollar_is_literal() {
        let ctx = TestCtx::default();
        assert_eq!(expand_vars("cost: $ 5", &ctx), "cost: $ 5");
        assert_eq!(expand_vars("$", &ctx), "$");
    }

    #[test]
    fn nested_index_parentheses() {
        let ctx = TestCtx::with(&[("m(f(1))", "deep")]);
        assert_eq!(expand_vars("$m(f(1))", &ctx), "deep");
    }

    #[test]
    fn subcommand_result_is_spliced() {
        let mut ctx = TestCtx::default();
        assert_eq!(tok("SET x [echo 5]", &mut ctx), ["SET", "x", "5"]);
        assert_eq!(tok("SET x a[echo b]c", &mut ctx), ["SET", "x", "abc"]);
    }

    #[test]
    fn subcommand_with_spaces_stays_one_argument() {
        let mut ctx = TestCtx::default();
        assert_eq!(
            tok(r#"SET x [echo say "hi" now]"#, &mut ctx),
            ["SET", "x", r#"say "hi" now"#]
        );
    }

    #[test]
    fn nested_subcommands_reach_the_context_unexpanded() {
        let mut ctx = TestCtx::default();
        assert_eq!(tok("PUTS [echo [echo 7]]", &mut ctx), ["PUTS", "7"]);
        assert_eq!(ctx.calls, ["echo [echo 7]", "echo 7"]);
    }

    #[test]
    fn unterminated_bracket_runs_to_end_of_line() {
        let mut ctx = TestCtx::default();
        assert_eq!(expand_subcommands("PUTS [echo a b", &mut ctx), r#"PUTS "a b""#);
        assert_eq!(ctx.calls, ["echo a b"]);
        assert_eq!(tok("PUTS x[echo [echo y", &mut ctx), ["PUTS", "xy"]);
    }

    #[test]
    fn subcommand_result_with_special_characters_is_one_argument() {
        let mut ctx = TestCtx::default();
        assert_eq!(tok("SET t [echo a#b]", &mut ctx), ["SET", "t", "a#b"]);
        assert_eq!(tok("SET t [echo it's]", &mut ctx), ["SET", "t", "it's"]);
        assert_eq!(tok(r"SET t [echo a]", &mut ctx), ["SET", "t", r"a"]);
        assert_eq!(tok("SET t [echo a]b]", &mut ctx), ["SET", "t", "ab"]);
    }

    #[test]
    fn unwinding_context_skips_remaining_brackets() {
        struct Stop(Vec<String>);
        impl EvalContext for Stop {
            fn get_var(&self, _: &str) -> Option<Value> {
                None
            }
            fn eval_subcommand(&mut self, src: &str) -> Option<String> {
                self.0.push(src.to_owned());
                None
            }
            fn unwinding(&self) -> bool {
                !self.0.is_empty()
            }
        }
        let mut ctx = Stop(Vec::new());
        assert_eq!(expand_subcommands("A [first] [second] B", &mut ctx), "A   B");
        assert_eq!(ctx.0, ["first"]);
    }

    #[test]
    fn failed_subcommand_is_empty() {
        let mut ctx = TestCtx::default();
        assert_eq!(tok("PUTS x[fail]y", &mut ctx), ["PUTS", "xy"]);
    }

    #[test]
    fn escaped_bracket_is_not_a_subcommand() {
        let mut ctx = TestCtx::default();
        assert_eq!(tok(r"PUTS a\[b\]", &mut ctx), ["PUTS", r"a\[b\]"]);
        assert!(ctx.calls.is_empty());
    }

    #[test]
    fn escape_table() {
        assert_eq!(decode_escapes(r"a\nb"), "a\nb");
        assert_eq!(decode_escapes(r"\\"), "\\");
        assert_eq!(decode_escapes(r"\d+\s\W"), r"\d+\s\W");
        assert_eq!(decode_escapes(r"A"), r"A");
        assert_eq!(decode_escapes(r"\q"), r"\q");
        assert_eq!(decode_escapes("end\\"), "end\\");
    }

    #[test]
    fn raw_split_kinds() {
        let toks = split_raw(r#"a "b c" 'd' [e f] g"#);
        let kinds: Vec<_> = toks.iter().map(|t| t.quoting).collect();
        assert_eq!(
            kinds,
            [Quoting::Bare, Quoting::Double, Quoting::Single, Quoting::Bracket, Quoting::Bare]
        );
        assert_eq!(toks[3].text, "e f");
    }

    #[test]
    fn unterminated_quote_runs_to_end() {
        let toks = split_raw(r#"PUTS "open ended"#);
        assert_eq!(toks[1].text, "open ended");
    }

    #[test]
    fn quote_word_round_trips() {
        let mut ctx = TestCtx::default();
        for word in ["plain", "", "two words", r#"q"uote"#, r"back\slash", "#hash"] {
            let line = format!("CMD {}", quote_word(word));
            assert_eq!(tok(&line, &mut ctx), ["CMD", word], "word {word:?}");
        }
    }
}
