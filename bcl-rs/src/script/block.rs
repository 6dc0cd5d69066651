//! Block structure of a BCL script.
//!
//! A script is parsed once into a tree of [`Block`]s before anything runs.
//! Lines that do not open or close a construct are kept verbatim as
//! [`Item::Line`]; they are tokenized only when executed, so substitution
//! always sees the variables of the moment.
//!
//! Branches hang off their owner as *siblings* rather than items:
//!
//! ```text
//! IF a THEN          If(a)       items: [x]   siblings: [ElseIf(b), Else]
//!   x                ElseIf(b)   items: [y]
//! ELSEIF b THEN      Else        items: [z]
//!   y
//! ELSE               SWITCH $v   Switch($v)   siblings: [Case(1), Default]
//!   z
//! END
//! ```
//!
//! The parser is tolerant by default: a stray `END`, a branch keyword with no
//! owner, or a block left open at end of input is logged as a warning and
//! repaired.  [`parse_script_checked`] turns the first such problem into a
//! [`ScriptError::Syntax`] instead.
//!
//! [`parse_script_with`] also bounds how deeply blocks may nest.  Going past
//! the bound is always an error, strict or not, since nothing can repair it.

use std::rc::Rc;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use super::error::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Sequence,
    If,
    ElseIf,
    Else,
    While,
    For,
    ForEach,
    Switch,
    Case,
    Default,
    Proc,
}

impl BlockKind {
    fn keyword(self) -> &'static str {
        match self {
            BlockKind::Sequence => "script",
            BlockKind::If => "IF",
            BlockKind::ElseIf => "ELSEIF",
            BlockKind::Else => "ELSE",
            BlockKind::While => "WHILE",
            BlockKind::For => "FOR",
            BlockKind::ForEach => "FOREACH",
            BlockKind::Switch => "SWITCH",
            BlockKind::Case => "CASE",
            BlockKind::Default => "DEFAULT",
            BlockKind::Proc => "PROC",
        }
    }

    fn is_branch(self) -> bool {
        matches!(self, BlockKind::ElseIf | BlockKind::Else)
    }

    fn is_arm(self) -> bool {
        matches!(self, BlockKind::Case | BlockKind::Default)
    }
}

/// A formal parameter of a procedure.  Optional parameters (`@name` in the
/// source) may be left unbound by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub optional: bool,
}

/// The header and body of a `PROC ... END` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcDef {
    pub name: String,
    pub params: Vec<Param>,
    /// Shared with the procedure table once the definition runs.
    pub body: Rc<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Line(String),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    /// Text after the keyword, up to `THEN`/`DO`.  Empty for Sequence, Else
    /// and Default; the label for Case; the subject for Switch.
    pub condition: String,
    pub items: Vec<Item>,
    /// ElseIf/Else branches of an If, or Case/Default arms of a Switch.
    pub siblings: Vec<Block>,
    /// Set only on Proc blocks.
    pub proc_def: Option<ProcDef>,
    /// 1-based source line that opened the block (0 for the root).
    pub line: usize,
}

impl Block {
    fn new(kind: BlockKind, condition: impl Into<String>, line: usize) -> Self {
        Block {
            kind,
            condition: condition.into(),
            items: Vec::new(),
            siblings: Vec::new(),
            proc_def: None,
            line,
        }
    }

    /// An empty top-level sequence.
    pub fn sequence() -> Self {
        Block::new(BlockKind::Sequence, "", 0)
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attach {
    /// Append to the parent's items.
    Item,
    /// Append to the parent's siblings; closing it also closes the parent.
    Sibling,
}

struct OpenBlock {
    block: Block,
    attach: Attach,
    /// Name and parameters of an open Proc; the body is sealed on close.
    signature: Option<(String, Vec<Param>)>,
}

struct BlockParser {
    stack: Vec<OpenBlock>,
    issues: Vec<(usize, String)>,
    max_depth: usize,
    /// Line that opened a block past `max_depth`.
    too_deep: Option<usize>,
}

/// Parse `src` into a root Sequence, repairing nesting problems.
pub fn parse_script(src: &str) -> Block {
    parse_script_with(src, usize::MAX, false).unwrap_or_else(|_| Block::sequence())
}

/// Parse `src`, failing on the first nesting problem.
pub fn parse_script_checked(src: &str) -> Result<Block, ScriptError> {
    parse_script_with(src, usize::MAX, true)
}

/// Parse `src` with blocks nested at most `max_depth` deep.  With `strict`,
/// the first nesting problem is an error as in [`parse_script_checked`].
pub fn parse_script_with(
    src: &str,
    max_depth: usize,
    strict: bool,
) -> Result<Block, ScriptError> {
    let (root, issues) = parse(src, max_depth)?;
    match issues.into_iter().next() {
        Some((line, message)) if strict => Err(ScriptError::Syntax { line, message }),
        _ => Ok(root),
    }
}

fn parse(src: &str, max_depth: usize) -> Result<(Block, Vec<(usize, String)>), ScriptError> {
    let mut p = BlockParser {
        stack: vec![OpenBlock {
            block: Block::sequence(),
            attach: Attach::Item,
            signature: None,
        }],
        issues: Vec::new(),
        max_depth,
        too_deep: None,
    };
    for (idx, raw) in src.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        p.line(line, idx + 1);
        if let Some(line) = p.too_deep {
            tracing::warn!(line, limit = max_depth, "blocks nested too deeply");
            return Err(ScriptError::RecursionLimit(max_depth));
        }
    }
    Ok(p.finish())
}

impl BlockParser {
    fn warn(&mut self, line: usize, message: String) {
        tracing::warn!(line, "{message}");
        self.issues.push((line, message));
    }

    fn top(&mut self) -> &mut OpenBlock {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn top_kind(&self) -> BlockKind {
        self.stack.last().map_or(BlockKind::Sequence, |o| o.block.kind)
    }

    fn at_root(&self) -> bool {
        self.stack.len() == 1
    }

    fn push(&mut self, block: Block, attach: Attach) {
        if self.stack.len() > self.max_depth {
            self.too_deep = Some(block.line);
        }
        self.stack.push(OpenBlock { block, attach, signature: None });
    }

    /// Close the top block and attach it to its parent.  Returns how it was
    /// attached.  The root is never popped.
    fn close_top(&mut self) -> Option<Attach> {
        if self.at_root() {
            return None;
        }
        let open = self.stack.pop()?;
        let attach = open.attach;
        let block = seal(open);
        let parent = &mut self.top().block;
        match attach {
            Attach::Item => parent.items.push(Item::Block(block)),
            Attach::Sibling => parent.siblings.push(block),
        }
        Some(attach)
    }

    fn line(&mut self, line: &str, line_no: usize) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }
        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r),
            None => (trimmed, ""),
        };
        let keyword = word.to_ascii_uppercase();

        match keyword.as_str() {
            "IF" if has_end_token(rest) => self.literal(trimmed),
            "IF" => self.open(BlockKind::If, condition_of(rest), line_no),
            "WHILE" => self.open(BlockKind::While, condition_of(rest), line_no),
            "FOR" => self.open(BlockKind::For, condition_of(rest), line_no),
            "FOREACH" => self.open(BlockKind::ForEach, condition_of(rest), line_no),
            "SWITCH" => self.open(BlockKind::Switch, unquote(&condition_of(rest)), line_no),
            "ELSEIF" => self.branch(BlockKind::ElseIf, condition_of(rest), line_no),
            "ELSE" => self.branch(BlockKind::Else, String::new(), line_no),
            "CASE" => self.arm(BlockKind::Case, unquote(&condition_of(rest)), line_no),
            "DEFAULT" => self.arm(BlockKind::Default, String::new(), line_no),
            "PROC" => self.proc(rest, line_no),
            "END" => self.end(line_no),
            _ => self.literal(trimmed),
        }
    }

    fn literal(&mut self, line: &str) {
        self.top().block.items.push(Item::Line(line.to_owned()));
    }

    fn open(&mut self, kind: BlockKind, condition: String, line_no: usize) {
        self.push(Block::new(kind, condition, line_no), Attach::Item);
    }

    fn branch(&mut self, kind: BlockKind, condition: String, line_no: usize) {
        if self.at_root() {
            self.warn(line_no, format!("{} without IF, ignored", kind.keyword()));
            return;
        }
        if self.top_kind().is_branch() {
            self.close_top();
        }
        if self.top_kind() != BlockKind::If {
            let owner = self.top_kind().keyword();
            self.warn(line_no, format!("{} inside {owner} block", kind.keyword()));
        }
        self.push(Block::new(kind, condition, line_no), Attach::Sibling);
    }

    fn arm(&mut self, kind: BlockKind, label: String, line_no: usize) {
        if self.at_root() {
            self.warn(line_no, format!("{} without SWITCH, ignored", kind.keyword()));
            return;
        }
        if self.top_kind().is_arm() {
            self.close_top();
        }
        if self.top_kind() != BlockKind::Switch {
            let owner = self.top_kind().keyword();
            self.warn(line_no, format!("{} inside {owner} block", kind.keyword()));
        }
        self.push(Block::new(kind, label, line_no), Attach::Sibling);
    }

    fn proc(&mut self, rest: &str, line_no: usize) {
        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or("").to_owned();
        let mut params = Vec::new();
        if words.next().is_some_and(|w| w.eq_ignore_ascii_case("WITH")) {
            for word in words.take_while(|w| !w.eq_ignore_ascii_case("DO")) {
                match word.strip_prefix('@') {
                    Some("") => {}
                    Some(opt) => params.push(Param { name: opt.to_owned(), optional: true }),
                    None => params.push(Param { name: word.to_owned(), optional: false }),
                }
            }
        }
        self.push(Block::new(BlockKind::Proc, "", line_no), Attach::Item);
        self.top().signature = Some((name, params));
    }

    fn end(&mut self, line_no: usize) {
        match self.close_top() {
            None => self.warn(line_no, "END without open block, ignored".to_owned()),
            Some(Attach::Sibling) => {
                self.close_top();
            }
            Some(Attach::Item) => {}
        }
    }

    fn finish(mut self) -> (Block, Vec<(usize, String)>) {
        while !self.at_root() {
            let (kind, line) = {
                let b = &self.top().block;
                (b.kind, b.line)
            };
            self.warn(line, format!("{} block opened here is never closed", kind.keyword()));
            self.close_top();
        }
        let root = self.stack.pop().map_or_else(Block::sequence, |o| o.block);
        (root, self.issues)
    }
}

/// Turn a closed open-block into its final form.  Proc items move into the
/// shared body.
fn seal(open: OpenBlock) -> Block {
    let mut block = open.block;
    if let Some((name, params)) = open.signature {
        let body = Block {
            kind: BlockKind::Sequence,
            condition: String::new(),
            items: std::mem::take(&mut block.items),
            siblings: Vec::new(),
            proc_def: None,
            line: block.line,
        };
        block.proc_def = Some(ProcDef { name, params, body: Rc::new(body) });
    }
    block
}

fn condition_terminator() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"\s(?:THEN|DO)(?:\s|$)")
            .case_insensitive(true)
            .build()
            .ok()
    })
    .as_ref()
}

/// The header text up to a whole-word `THEN` or `DO`.
fn condition_of(rest: &str) -> String {
    // Pad so a condition-less `IF THEN` still finds the keyword.
    let padded = format!(" {rest}");
    let end = condition_terminator()
        .and_then(|re| re.find(&padded))
        .map_or(padded.len(), |m| m.start());
    padded[..end].trim().to_owned()
}

fn has_end_token(rest: &str) -> bool {
    rest.split_whitespace().any(|w| w.eq_ignore_ascii_case("END"))
}

/// Remove one pair of matching surrounding quotes.
fn unquote(s: &str) -> String {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].to_owned();
        }
    }
    s.to_owned()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
