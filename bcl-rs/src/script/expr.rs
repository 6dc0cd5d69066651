//! BCL expression evaluator.
//!
//! `EXPR` and every block condition go through [`eval_str`].  The input has
//! already been substituted, so the evaluator only ever sees numbers,
//! operators, parentheses, commas and function names.  Evaluation is a
//! two-stack shunting-yard that applies each operator as soon as it is
//! popped; there is no intermediate AST.
//!
//! Operator precedence (lowest → highest):
//!
//! | Level | Operators                       | Associativity |
//! |-------|---------------------------------|---------------|
//! | 1     | `\|\|` `OR`                     | left          |
//! | 2     | `&&` `AND`                      | left          |
//! | 3     | `==` `!=`                       | left          |
//! | 4     | `<` `<=` `>` `>=`               | left          |
//! | 5     | `+` `-`                         | left          |
//! | 6     | `*` `/` `%`                     | left          |
//! | 7     | `!` `NOT`, unary `-`            | right         |
//! | 8     | `**` `^`                        | right         |
//!
//! The evaluator never fails.  Division by zero yields `0`, unknown names
//! evaluate to `0`, and an operator short of operands is dropped.

use std::cell::Cell;
use std::f64::consts::PI;

use super::value::Value;

const EPSILON: f64 = 1e-10;

// ── Operators and functions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Not,
    Neg,
    Pow,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Op::Or => 1,
            Op::And => 2,
            Op::Eq | Op::Ne => 3,
            Op::Lt | Op::Le | Op::Gt | Op::Ge => 4,
            Op::Add | Op::Sub => 5,
            Op::Mul | Op::Div | Op::Mod => 6,
            Op::Not | Op::Neg => 7,
            Op::Pow => 8,
        }
    }

    fn right_assoc(self) -> bool {
        matches!(self, Op::Pow | Op::Not | Op::Neg)
    }

    fn is_prefix(self) -> bool {
        matches!(self, Op::Not | Op::Neg)
    }

    fn apply(self, l: f64, r: f64) -> f64 {
        let b = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            Op::Or => b(l != 0.0 || r != 0.0),
            Op::And => b(l != 0.0 && r != 0.0),
            Op::Eq => b((l - r).abs() < EPSILON),
            Op::Ne => b((l - r).abs() >= EPSILON),
            Op::Lt => b(l < r),
            Op::Le => b(l <= r),
            Op::Gt => b(l > r),
            Op::Ge => b(l >= r),
            Op::Add => l + r,
            Op::Sub => l - r,
            Op::Mul => l * r,
            Op::Div => {
                if r != 0.0 {
                    l / r
                } else {
                    0.0
                }
            }
            Op::Mod => l % r,
            Op::Pow => l.powf(r),
            // Prefix operators take their operand in `r`.
            Op::Not => b(r == 0.0),
            Op::Neg => -r,
        }
    }
}

/// Built-in math functions with fixed arity.
#[derive(Debug, Clone, Copy)]
enum Func {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
}

impl Func {
    fn lookup(name: &str) -> Func {
        let lower = name.to_ascii_lowercase();
        let f1: fn(f64) -> f64 = match lower.as_str() {
            "sin" => f64::sin,
            "cos" => f64::cos,
            "tan" => f64::tan,
            "asin" => f64::asin,
            "acos" => f64::acos,
            "atan" => f64::atan,
            "sinh" => f64::sinh,
            "cosh" => f64::cosh,
            "tanh" => f64::tanh,
            "sqrt" => f64::sqrt,
            "cbrt" => f64::cbrt,
            "abs" => f64::abs,
            "int" | "floor" => f64::floor,
            "double" => |x| x,
            "ceil" => f64::ceil,
            "round" => f64::round,
            "ln" => f64::ln,
            "log" | "log10" => f64::log10,
            "log2" => f64::log2,
            "exp" => f64::exp,
            "sign" => sign,
            "rand" => |_| next_random(),
            "rad" => |x| x * PI / 180.0,
            "deg" => |x| x * 180.0 / PI,
            "pow" => return Func::Binary(f64::powf),
            "hypot" => return Func::Binary(f64::hypot),
            "atan2" => return Func::Binary(f64::atan2),
            "min" => return Func::Binary(|a, b| if a < b { a } else { b }),
            "max" => return Func::Binary(|a, b| if a > b { a } else { b }),
            "fmod" => return Func::Binary(|a, b| a % b),
            _ => |_| 0.0,
        };
        Func::Unary(f1)
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

// ── rand() PRNG ───────────────────────────────────────────────────────────────

thread_local! {
    static RNG_STATE: Cell<u64> = Cell::new(seed());
}

fn seed() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E37_79B9_7F4A_7C15);
    nanos | 1
}

/// xorshift64*, mapped to `[0, 1)`.
fn next_random() -> f64 {
    RNG_STATE.with(|state| {
        let mut x = state.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        state.set(x);
        let r = x.wrapping_mul(0x2545_F491_4F6C_DD1D);
        (r >> 11) as f64 / (1u64 << 53) as f64
    })
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(Op),
    /// `-` or `+`; whether it is binary or a sign depends on position.
    Minus,
    Plus,
    LParen,
    RParen,
    Comma,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { src: src.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn slice(&self, start: usize) -> &'a str {
        // Only ASCII bytes are consumed by the number/ident readers.
        std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("")
    }

    fn read_number(&mut self) -> f64 {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek2(), Some(b'x' | b'X')) {
            let save = self.pos;
            self.pos += 2;
            let digits = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            if self.pos > digits {
                return u64::from_str_radix(self.slice(digits), 16).map_or(0.0, |n| n as f64);
            }
            self.pos = save;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.eat(b'.') {
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        self.slice(start).parse().unwrap_or(0.0)
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        self.slice(start).to_owned()
    }

    /// Next token, or `None` at end of input or on an unrecognised byte.
    fn next_token(&mut self) -> Option<Token> {
        self.skip_ws();
        let c = self.peek()?;
        if c.is_ascii_digit() || (c == b'.' && matches!(self.peek2(), Some(d) if d.is_ascii_digit())) {
            return Some(Token::Num(self.read_number()));
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let word = self.read_ident();
            return Some(match word.to_ascii_uppercase().as_str() {
                "AND" => Token::Op(Op::And),
                "OR" => Token::Op(Op::Or),
                "NOT" => Token::Op(Op::Not),
                _ => Token::Ident(word),
            });
        }
        self.advance();
        let tok = match c {
            b'*' if self.eat(b'*') => Token::Op(Op::Pow),
            b'<' if self.eat(b'=') => Token::Op(Op::Le),
            b'>' if self.eat(b'=') => Token::Op(Op::Ge),
            b'!' if self.eat(b'=') => Token::Op(Op::Ne),
            b'=' if self.eat(b'=') => Token::Op(Op::Eq),
            b'&' if self.eat(b'&') => Token::Op(Op::And),
            b'|' if self.eat(b'|') => Token::Op(Op::Or),
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Op(Op::Mul),
            b'/' => Token::Op(Op::Div),
            b'%' => Token::Op(Op::Mod),
            b'^' => Token::Op(Op::Pow),
            b'<' => Token::Op(Op::Lt),
            b'>' => Token::Op(Op::Gt),
            b'!' => Token::Op(Op::Not),
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            _ => return None,
        };
        Some(tok)
    }
}

// ── Shunting-yard evaluator ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Pending {
    Op(Op),
    Func(Func),
    LParen,
}

#[derive(Default)]
struct Machine {
    values: Vec<f64>,
    ops: Vec<Pending>,
}

impl Machine {
    fn apply_op(&mut self, op: Op) {
        if op.is_prefix() {
            if let Some(top) = self.values.last_mut() {
                *top = op.apply(0.0, *top);
            }
        } else if self.values.len() >= 2 {
            let r = self.values.pop().unwrap_or(0.0);
            let l = self.values.pop().unwrap_or(0.0);
            self.values.push(op.apply(l, r));
        }
    }

    fn apply_func(&mut self, f: Func) {
        match f {
            Func::Unary(f) => {
                if let Some(top) = self.values.last_mut() {
                    *top = f(*top);
                }
            }
            Func::Binary(f) => {
                if self.values.len() >= 2 {
                    let b = self.values.pop().unwrap_or(0.0);
                    let a = self.values.pop().unwrap_or(0.0);
                    self.values.push(f(a, b));
                }
            }
        }
    }

    fn apply(&mut self, p: Pending) {
        match p {
            Pending::Op(op) => self.apply_op(op),
            Pending::Func(f) => self.apply_func(f),
            Pending::LParen => {}
        }
    }

    /// Pop and apply everything above the nearest `(`, leaving it in place.
    fn reduce_group(&mut self) {
        while let Some(&top) = self.ops.last() {
            if matches!(top, Pending::LParen) {
                break;
            }
            self.ops.pop();
            self.apply(top);
        }
    }

    fn push_op(&mut self, op: Op) {
        if !op.is_prefix() {
            while let Some(&Pending::Op(top)) = self.ops.last() {
                let (p_top, p_new) = (top.precedence(), op.precedence());
                if p_top > p_new || (p_top == p_new && !op.right_assoc()) {
                    self.ops.pop();
                    self.apply_op(top);
                } else {
                    break;
                }
            }
        }
        self.ops.push(Pending::Op(op));
    }

    fn close_paren(&mut self) {
        self.reduce_group();
        if matches!(self.ops.last(), Some(Pending::LParen)) {
            self.ops.pop();
        }
        if let Some(&Pending::Func(f)) = self.ops.last() {
            self.ops.pop();
            self.apply_func(f);
        }
    }

    fn finish(mut self) -> f64 {
        while let Some(p) = self.ops.pop() {
            self.apply(p);
        }
        self.values.last().copied().unwrap_or(0.0)
    }
}

/// Evaluate an already-substituted expression to a number.
pub fn eval_number(src: &str) -> f64 {
    let mut lexer = Lexer::new(src);
    let mut m = Machine::default();
    // True where a value is expected next, so `-` there is a sign.
    let mut want_operand = true;

    while let Some(tok) = lexer.next_token() {
        match tok {
            Token::Num(n) => {
                m.values.push(n);
                want_operand = false;
            }
            Token::Ident(name) => {
                lexer.skip_ws();
                if lexer.peek() == Some(b'(') {
                    m.ops.push(Pending::Func(Func::lookup(&name)));
                    want_operand = true;
                } else {
                    m.values.push(0.0);
                    want_operand = false;
                }
            }
            Token::Minus if want_operand => m.push_op(Op::Neg),
            Token::Plus if want_operand => {}
            Token::Minus => {
                m.push_op(Op::Sub);
                want_operand = true;
            }
            Token::Plus => {
                m.push_op(Op::Add);
                want_operand = true;
            }
            Token::Op(op) => {
                m.push_op(op);
                want_operand = true;
            }
            Token::LParen => {
                m.ops.push(Pending::LParen);
                want_operand = true;
            }
            Token::RParen => {
                m.close_paren();
                want_operand = false;
            }
            Token::Comma => {
                m.reduce_group();
                want_operand = true;
            }
        }
    }
    m.finish()
}

/// Evaluate an expression and render the result as a BCL value.
pub fn eval_str(src: &str) -> Value {
    Value::from_number(eval_number(src))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
