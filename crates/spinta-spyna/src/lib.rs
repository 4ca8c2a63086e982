//! Spyna - the expression language used in `prepare`, `ref` filters and
//! query plans
//!
//! Every expression is a tree of calls `{"name": <op>, "args": [...]}`
//! whose leaves are JSON scalars or `bind` nodes naming an identifier.
//! Surface syntax accepted by the parser:
//! - calls `eq(a, 1)` and method calls `a.lower()` (receiver becomes the
//!   first argument)
//! - infix comparisons `=`, `!=`, `<`, `<=`, `>`, `>=`, boolean `&`, `|`,
//!   prefix `!`, and arithmetic `+ - * / %`
//! - attribute access `a.b`, subscripts `Model[a, b]`, lists `[a, b]`
//! - `null`, `true`, `false`, integers, floats, `'single'` and
//!   `"double"` quoted strings
//!
//! [`unparse`] always writes the canonical call form, so
//! `parse(unparse(t)) == t` for every tree whose floats are finite.
//! Non-finite floats unparse to `null`, matching [`Expr::to_json`].

mod ast;
mod error;
mod parser;
mod token;
mod unparse;

pub use ast::{Expr, BIND};
pub use error::SpynaError;
pub use parser::Parser;
pub use token::{tokenize, Span, Token, TokenKind};
pub use unparse::unparse;

/// Parse an expression string into a tree
pub fn parse(source: &str) -> Result<Expr, SpynaError> {
    let tokens = tokenize(source);
    let mut parser = Parser::new(source, tokens);
    parser.parse_expression()
}
