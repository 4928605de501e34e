//! Template script: the language compiled templates are lowered to
//!
//! Text between tags is output verbatim. `<%= expr %>` echoes an expression
//! and `<% ... %>` holds statements, including colon-form blocks such as
//! `if (...): ... endif;` that may span several tags.
//!
//! Scripts are parsed into an instruction tree and interpreted. The
//! interpreter has no ambient capabilities; everything beyond its own scope is
//! reached through a [`Host`].

pub mod ast;
mod builtins;
mod interp;
mod lexer;
mod parser;
pub mod value;

pub use builtins::ucfirst;
pub use interp::{Host, Interpreter, Scope};
pub use parser::parse;
pub use value::ValueExt;

/// Names of the pure built-in functions
pub fn builtin_names() -> &'static [&'static str] {
    builtins::NAMES
}
