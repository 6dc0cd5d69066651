//! BCL scripting language.
//!
//! BCL is a small command language in which every value is a string.  A
//! script is a sequence of lines; each line names a command followed by its
//! arguments.  Keywords and command names are case-insensitive.
//!
//! | Module       | Role                                                   |
//! |--------------|--------------------------------------------------------|
//! | [`value`]    | string values with a cached numeric reading            |
//! | [`expand`]   | tokenizing, `$var` and `[subcommand]` substitution     |
//! | [`expr`]     | numeric expressions and math functions                 |
//! | [`block`]    | multi-line `IF`/`WHILE`/`FOR`/`PROC` structure         |
//! | [`scope`]    | global variables and procedure frames                  |
//! | [`exec`]     | walking a block tree                                   |
//! | [`builtins`] | the built-in command table                             |
//! | [`interp`]   | the [`Interpreter`] tying it all together              |
//!
//! # Quick start
//!
//! ```rust
//! use bcl::script::Interpreter;
//!
//! let mut interp = Interpreter::new().with_captured_output();
//! interp.run("SET x 6\nPUTS [EXPR $x * 7]").unwrap();
//! assert_eq!(interp.take_output(), "42\n");
//! ```

pub mod block;
pub mod builtins;
pub mod error;
pub mod exec;
pub mod expand;
pub mod expr;
pub mod interp;
pub mod scope;
pub mod value;

pub use block::{parse_script, Block};
pub use error::ScriptError;
pub use expand::EvalContext;
pub use interp::{Interpreter, Signal};
pub use value::Value;
