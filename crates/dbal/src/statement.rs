//! Caller bindings and driver-level statement preparation.
//!
//! Builders emit SQL containing generated `:<n>` tokens and caller
//! placeholders (`:name`, `?`). Before execution every placeholder is
//! rewritten to a positional `?` and its value collected in order; the
//! diagnostic form substitutes quoted literals instead.

use crate::error::{DbError, DbResult};
use crate::qb::SqlType;
use crate::qb::param::{ParameterBinder, is_token_byte};
use crate::value::{Arg, Value};

/// Values for caller-managed placeholders, supplied at execute time.
///
/// # Example
/// ```ignore
/// let b = Bindings::new()
///     .bind(":email", "a@example.com")
///     .push(1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    named: Vec<(String, Value)>,
    positional: Vec<Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a named placeholder (the leading `:` is optional).
    ///
    /// Binding the same name twice keeps the last value.
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    /// Append a value for the next `?` placeholder.
    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Merge `other` into `self`; named values in `other` win.
    pub fn extend(&mut self, other: Bindings) {
        for (name, value) in other.named {
            self.set(&name, value);
        }
        self.positional.extend(other.positional);
    }

    fn set(&mut self, name: &str, value: Value) {
        let name = if name.starts_with(':') {
            name.to_string()
        } else {
            format!(":{name}")
        };
        match self.named.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => {
                if *slot != value {
                    tracing::warn!(
                        target: "dbal.bind",
                        placeholder = %name,
                        "placeholder re-bound with a different value; last value wins"
                    );
                }
                *slot = value;
            }
            None => self.named.push((name, value)),
        }
    }

    /// Look up a named value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub(crate) fn take_positional(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.positional)
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.positional.is_empty()
    }
}

/// A statement ready for the driver: `?` placeholders and ordered values.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub kind: SqlType,
}

impl BoundStatement {
    /// Rewrite every placeholder in `sql` to `?` and collect its value.
    ///
    /// Fails with [`DbError::BindingMismatch`] on an unresolved placeholder,
    /// a positional count mismatch, or a caller name that shadows a
    /// generated token.
    pub fn prepare(
        sql: &str,
        kind: SqlType,
        generated: &ParameterBinder,
        caller: &Bindings,
    ) -> DbResult<Self> {
        for (name, _) in &caller.named {
            if generated.get(name).is_some() {
                return Err(DbError::binding_mismatch(format!(
                    "caller binding {name} collides with a generated token"
                )));
            }
        }

        let mut out = String::with_capacity(sql.len());
        let mut params = Vec::with_capacity(generated.len() + caller.positional.len());
        let mut positional = caller.positional.iter();
        let mut used_named = vec![false; caller.named.len()];

        for piece in split_placeholders(sql) {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Positional => {
                    let value = positional.next().ok_or_else(|| {
                        DbError::binding_mismatch(format!(
                            "not enough positional values: {} supplied",
                            caller.positional.len()
                        ))
                    })?;
                    out.push('?');
                    params.push(value.clone());
                }
                Piece::Named(name) => {
                    let value = match generated.get(name) {
                        Some(v) => v,
                        None => {
                            let idx = caller
                                .named
                                .iter()
                                .position(|(n, _)| n == name)
                                .ok_or_else(|| {
                                    DbError::binding_mismatch(format!(
                                        "unresolved placeholder {name}"
                                    ))
                                })?;
                            used_named[idx] = true;
                            &caller.named[idx].1
                        }
                    };
                    out.push('?');
                    params.push(value.clone());
                }
            }
        }

        let surplus = positional.count();
        if surplus > 0 {
            return Err(DbError::binding_mismatch(format!(
                "{surplus} positional value(s) left without a placeholder"
            )));
        }
        for ((name, _), used) in caller.named.iter().zip(used_named) {
            if !used {
                tracing::warn!(target: "dbal.bind", placeholder = %name, "unused named binding");
            }
        }

        Ok(Self {
            sql: out,
            params,
            kind,
        })
    }

    /// Prepare hand-written SQL that only uses caller placeholders.
    pub fn raw(sql: &str, caller: &Bindings) -> DbResult<Self> {
        let generated = ParameterBinder::new(Default::default());
        Self::prepare(sql, SqlType::from_sql(sql), &generated, caller)
    }
}

/// Substitute every resolvable placeholder with its quoted literal.
///
/// Unresolvable placeholders are left untouched. The result is for
/// diagnostics only.
pub fn render_sql(sql: &str, generated: &ParameterBinder, caller: &Bindings) -> String {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut positional = caller.positional.iter();

    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Positional => match positional.next() {
                Some(value) => out.push_str(&value.to_literal()),
                None => out.push('?'),
            },
            Piece::Named(name) => match generated.get(name).or_else(|| caller.get(name)) {
                Some(value) => out.push_str(&value.to_literal()),
                None => out.push_str(name),
            },
        }
    }
    out
}

/// Swap each `?` in `sql` for a generated token holding the matching value.
///
/// A fragment spliced into another statement keeps its positional values
/// attached to its own placeholders this way. With no values the SQL is
/// returned unchanged and its `?` are left to the enclosing statement.
pub(crate) fn inline_positional(
    sql: &str,
    values: Vec<Value>,
    binder: &mut ParameterBinder,
) -> DbResult<String> {
    if values.is_empty() {
        return Ok(sql.to_string());
    }
    let pieces = split_placeholders(sql);
    let expected = pieces.iter().filter(|p| **p == Piece::Positional).count();
    if expected != values.len() {
        return Err(DbError::binding_mismatch(format!(
            "{} positional value(s) for {expected} '?' placeholder(s)",
            values.len()
        )));
    }

    let mut values = values.into_iter();
    let mut out = String::with_capacity(sql.len() + 8);
    for piece in pieces {
        match piece {
            Piece::Text(text) | Piece::Named(text) => out.push_str(text),
            Piece::Positional => {
                if let Some(value) = values.next() {
                    out.push_str(&binder.bind(Arg::Value(value))?);
                }
            }
        }
    }
    Ok(out)
}

#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Named(&'a str),
    Positional,
}

/// Split SQL into text and placeholders, ignoring anything inside quoted
/// strings or back-quoted identifiers.
fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' && q != b'`' {
                i += 2;
                continue;
            }
            if b == q {
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'\'' | b'"' | b'`' => {
                quote = Some(b);
                i += 1;
            }
            b'?' => {
                if text_start < i {
                    pieces.push(Piece::Text(&sql[text_start..i]));
                }
                pieces.push(Piece::Positional);
                i += 1;
                text_start = i;
            }
            b':' => {
                let prev_is_word = i > 0 && (is_token_byte(bytes[i - 1]) || bytes[i - 1] == b':');
                let mut end = i + 1;
                while end < bytes.len() && is_token_byte(bytes[end]) {
                    end += 1;
                }
                if prev_is_word || end == i + 1 {
                    i += 1;
                    continue;
                }
                if text_start < i {
                    pieces.push(Piece::Text(&sql[text_start..i]));
                }
                pieces.push(Piece::Named(&sql[i..end]));
                i = end;
                text_start = i;
            }
            _ => i += 1,
        }
    }

    if text_start < sql.len() {
        pieces.push(Piece::Text(&sql[text_start..]));
    }
    pieces
}
