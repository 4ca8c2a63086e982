use std::fmt::Write;

use crate::ast::{Expr, BIND};

/// Render a tree in canonical call form
pub fn unparse(expr: &Expr) -> String {
    let mut output = String::new();
    write_expr(&mut output, expr);
    output
}

fn write_expr(output: &mut String, expr: &Expr) {
    match expr {
        Expr::Null => output.push_str("null"),
        Expr::Bool(true) => output.push_str("true"),
        Expr::Bool(false) => output.push_str("false"),
        Expr::Int(value) => {
            let _ = write!(output, "{}", value);
        }
        // non-finite floats have no literal; written as in the JSON form
        Expr::Float(value) if !value.is_finite() => output.push_str("null"),
        Expr::Float(value) => {
            let _ = write!(output, "{:?}", value);
        }
        Expr::Str(value) => write_string(output, value),
        Expr::List(items) => {
            output.push('[');
            write_args(output, items);
            output.push(']');
        }
        Expr::Call { name, args } => {
            if name == BIND {
                if let [Expr::Str(identifier)] = args.as_slice() {
                    if is_bare_identifier(identifier) {
                        output.push_str(identifier);
                        return;
                    }
                }
            }
            output.push_str(name);
            output.push('(');
            write_args(output, args);
            output.push(')');
        }
    }
}

fn write_args(output: &mut String, args: &[Expr]) {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            output.push_str(", ");
        }
        write_expr(output, arg);
    }
}

fn write_string(output: &mut String, value: &str) {
    output.push('\'');
    for c in value.chars() {
        match c {
            '\\' => output.push_str("\\\\"),
            '\'' => output.push_str("\\'"),
            '\n' => output.push_str("\\n"),
            '\t' => output.push_str("\\t"),
            '\r' => output.push_str("\\r"),
            other => output.push(other),
        }
    }
    output.push('\'');
}

/// Identifiers the lexer reads back as a single `Ident` token
fn is_bare_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '@')
        && !matches!(value, "null" | "true" | "false")
}
