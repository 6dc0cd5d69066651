//! Runtime value type for BCL.
//!
//! Every BCL value is a string.  Numeric interpretation is computed on first
//! use and cached alongside the text; because a [`Value`] is never mutated in
//! place, assigning a new value to a variable is what invalidates the cache.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

/// An immutable BCL string with a lazily parsed number.
#[derive(Clone)]
pub struct Value {
    text: Rc<str>,
    number: OnceCell<Option<f64>>,
}

impl Value {
    pub fn new(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Value {
            text: Rc::from(text),
            number: OnceCell::new(),
        }
    }

    /// The empty string.
    pub fn empty() -> Self {
        Value::new(String::new())
    }

    /// Render `n` in BCL's canonical numeric form and pre-seed the cache.
    pub fn from_number(n: f64) -> Self {
        let v = Value::new(format_number(n));
        let _ = v.number.set(Some(n));
        v
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Numeric interpretation, or `None` when the text is not a number.
    ///
    /// Leading and trailing whitespace is accepted, mirroring `strtod` with a
    /// full-consumption check.
    pub fn to_number(&self) -> Option<f64> {
        *self.number.get_or_init(|| parse_number(&self.text))
    }

    /// Truthiness: `""` and `"0"` are false, everything else is true.
    pub fn is_truthy(&self) -> bool {
        !self.text.is_empty() && &*self.text != "0"
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::empty()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", &*self.text)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::new(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::new(s)
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        &*self.text == other
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        &*self.text == *other
    }
}

// ── Numeric parsing and formatting ────────────────────────────────────────────

/// Parse a BCL number.  Accepts surrounding whitespace, decimal and exponent
/// forms, `inf`/`nan`, and `0x` hexadecimal integers.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let (neg, body) = match t.as_bytes()[0] {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        let n = u64::from_str_radix(hex, 16).ok()? as f64;
        return Some(if neg { -n } else { n });
    }
    t.parse::<f64>().ok()
}

/// Format a number the way BCL prints expression results: no decimal point
/// when the value is integral (`%.0f`), otherwise up to 15 significant digits
/// (`%.15g`).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_owned() } else { "-inf".to_owned() };
    }
    if n == n.floor() {
        if n == 0.0 {
            return "0".to_owned();
        }
        return format!("{n:.0}");
    }
    format_g15(n)
}

const SIG_DIGITS: i32 = 15;

fn format_g15(n: f64) -> String {
    // Scientific rendering gives the decimal exponent after rounding to the
    // requested number of significant digits.
    let sci = format!("{:.*e}", (SIG_DIGITS - 1) as usize, n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= SIG_DIGITS {
        let m = strip_fraction_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{m}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (SIG_DIGITS - 1 - exp).max(0) as usize;
        strip_fraction_zeros(&format!("{n:.decimals$}")).to_owned()
    }
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
