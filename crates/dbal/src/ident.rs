//! Back-quoted identifier formatting.
//!
//! Field expressions accepted by the builders:
//!
//! - bare names: `name` → `` `name` ``
//! - dotted names: `order.amount` → `` `order`.`amount` `` (`t.*` keeps the star)
//! - one function call with optional alias:
//!   `sum(order.amount) as total` → `` sum(`order`.`amount`) as `total` ``
//!
//! # Example
//! ```ignore
//! use dbal::ident::format_field;
//!
//! assert_eq!(format_field("u.id")?, "`u`.`id`");
//! # Ok::<(), dbal::DbError>(())
//! ```

use crate::error::{DbError, DbResult};

/// Format a field expression with back-quoted identifiers.
pub fn format_field(field: &str) -> DbResult<String> {
    let field = field.trim();
    if field.is_empty() {
        return Err(DbError::compilation("Field expression cannot be empty"));
    }

    let (expr, alias) = split_alias(field)?;
    let mut out = format_expr(expr)?;
    if let Some(alias) = alias {
        out.push_str(" as ");
        out.push_str(&quote_ident(alias)?);
    }
    Ok(out)
}

/// Back-quote a single identifier segment.
///
/// Already back-quoted input is returned unchanged; `*` is never quoted.
pub fn quote_ident(name: &str) -> DbResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DbError::compilation("Identifier cannot be empty"));
    }
    if name == "*" {
        return Ok("*".to_string());
    }
    if name.len() >= 2 && name.starts_with('`') && name.ends_with('`') {
        let inner = &name[1..name.len() - 1];
        if inner.is_empty() || inner.contains('`') {
            return Err(DbError::compilation(format!("Malformed identifier: {name}")));
        }
        return Ok(name.to_string());
    }
    if name.contains('`') || name.contains('\0') {
        return Err(DbError::compilation(format!(
            "Identifier cannot contain back-quote or NUL: {name}"
        )));
    }
    if name.contains(char::is_whitespace) {
        return Err(DbError::compilation(format!(
            "Unquoted identifier cannot contain whitespace: {name}"
        )));
    }
    Ok(format!("`{name}`"))
}

/// Split a trailing top-level `as <alias>` (case-insensitive) off a field.
fn split_alias(field: &str) -> DbResult<(&str, Option<&str>)> {
    let lower = field.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut depth: i32 = 0;
    let mut split_at = None;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b' ' if depth == 0 && lower[i..].starts_with(" as ") => split_at = Some(i),
            _ => {}
        }
    }

    match split_at {
        Some(i) => {
            let alias = field[i + 4..].trim();
            if alias.is_empty() {
                return Err(DbError::compilation(format!("Empty alias in: {field}")));
            }
            Ok((field[..i].trim(), Some(alias)))
        }
        None => Ok((field, None)),
    }
}

fn format_expr(expr: &str) -> DbResult<String> {
    let expr = expr.trim();
    let Some(open) = expr.find('(') else {
        return format_dotted(expr);
    };

    let close = expr
        .rfind(')')
        .filter(|&close| close > open)
        .ok_or_else(|| DbError::compilation(format!("Unbalanced parentheses in: {expr}")))?;
    if !expr[close + 1..].trim().is_empty() {
        return Err(DbError::compilation(format!(
            "Unexpected text after function call in: {expr}"
        )));
    }

    let func = expr[..open].trim();
    if func.is_empty() || !func.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DbError::compilation(format!("Malformed function name in: {expr}")));
    }

    let operand = &expr[open + 1..close];
    if !balanced(operand) {
        return Err(DbError::compilation(format!("Unbalanced parentheses in: {expr}")));
    }

    Ok(format!("{func}({})", format_operand(operand)?))
}

fn format_operand(operand: &str) -> DbResult<String> {
    let operand = operand.trim();
    if operand.is_empty() {
        return Ok(String::new());
    }
    if operand == "*" {
        return Ok("*".to_string());
    }
    let lower = operand.to_ascii_lowercase();
    if lower.starts_with("distinct ") {
        return Ok(format!("distinct {}", format_expr(&operand[9..])?));
    }
    format_expr(operand)
}

fn format_dotted(name: &str) -> DbResult<String> {
    if name.contains(['(', ')']) {
        return Err(DbError::compilation(format!("Unbalanced parentheses in: {name}")));
    }
    let parts = name
        .split('.')
        .map(quote_ident)
        .collect::<DbResult<Vec<_>>>()?;
    Ok(parts.join("."))
}

fn balanced(s: &str) -> bool {
    let mut depth: i32 = 0;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
