//! Placeholder allocation for literal values.

use crate::error::{DbError, DbResult};
use crate::value::{Arg, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Thread-safe generator of `:<n>` placeholder tokens.
///
/// Clones share the same counter, so every builder drawing from one sequence
/// (including `fresh()` sub-builders) gets monotonically increasing tokens
/// and never reuses one. Models default to [`TokenSequence::global`], which
/// lets builders from unrelated Models be unioned or nested safely.
#[derive(Clone, Debug, Default)]
pub struct TokenSequence(Arc<AtomicU64>);

impl TokenSequence {
    /// The process-wide sequence shared by every Model that does not opt out.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<TokenSequence> = OnceLock::new();
        GLOBAL.get_or_init(TokenSequence::new).clone()
    }

    /// Create a private sequence starting at `:0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sequence whose first token is `:<start>`.
    pub fn starting_at(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    /// Allocate the next token.
    pub fn next_token(&self) -> String {
        let n = self.0.fetch_add(1, Ordering::Relaxed);
        format!(":{n}")
    }

    /// Returns `true` if both handles draw from the same counter.
    pub fn same_sequence(&self, other: &TokenSequence) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Returns `true` for a caller-managed placeholder: `?` or `:name`.
pub fn is_placeholder(s: &str) -> bool {
    if s == "?" {
        return true;
    }
    match s.strip_prefix(':') {
        Some(name) => !name.is_empty() && name.bytes().all(is_token_byte),
        None => false,
    }
}

pub(crate) fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Records `token -> value` for one statement build.
#[derive(Clone, Debug)]
pub struct ParameterBinder {
    tokens: TokenSequence,
    bindings: Vec<(String, Value)>,
}

impl ParameterBinder {
    pub fn new(tokens: TokenSequence) -> Self {
        Self {
            tokens,
            bindings: Vec::new(),
        }
    }

    /// Bind one operand and return the SQL text standing in for it.
    ///
    /// Literals get a fresh token; caller placeholders are returned verbatim.
    pub fn bind(&mut self, arg: Arg) -> DbResult<String> {
        match arg {
            Arg::Value(value) => {
                let token = self.tokens.next_token();
                self.bindings.push((token.clone(), value));
                Ok(token)
            }
            Arg::Param(p) if is_placeholder(&p) => Ok(p),
            Arg::Param(p) => Err(DbError::compilation(format!(
                "Invalid placeholder {p:?}: expected '?' or ':name'"
            ))),
        }
    }

    /// Bind an IN / NOT IN list: `(:0,:1,:2)`.
    pub fn bind_list(&mut self, args: Vec<Arg>) -> DbResult<String> {
        let tokens = args
            .into_iter()
            .map(|arg| self.bind(arg))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(format!("({})", tokens.join(",")))
    }

    /// Bind a BETWEEN range: `:0 and :1`.
    pub fn bind_range(&mut self, low: Arg, high: Arg) -> DbResult<String> {
        let low = self.bind(low)?;
        let high = self.bind(high)?;
        Ok(format!("{low} and {high}"))
    }

    /// Merge the bindings of another binder (a sub-builder or unioned query).
    ///
    /// The same token bound to two different values is a collision.
    pub fn absorb(&mut self, other: ParameterBinder) -> DbResult<()> {
        for (token, value) in other.bindings {
            match self.get(&token) {
                Some(existing) if *existing == value => {}
                Some(existing) => {
                    return Err(DbError::binding_mismatch(format!(
                        "token {token} bound to both {} and {}",
                        existing.to_literal(),
                        value.to_literal()
                    )));
                }
                None => self.bindings.push((token, value)),
            }
        }
        Ok(())
    }

    /// Look up the value bound to `token`.
    pub fn get(&self, token: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, v)| v)
    }

    /// Token/value pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(t, v)| (t.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The token sequence this binder draws from.
    pub fn tokens(&self) -> &TokenSequence {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::param;

    #[test]
    fn tokens_are_never_reused_across_clones() {
        let seq = TokenSequence::new();
        let other = seq.clone();
        assert_eq!(seq.next_token(), ":0");
        assert_eq!(other.next_token(), ":1");
        assert_eq!(seq.next_token(), ":2");
        assert!(seq.same_sequence(&other));
        assert!(!seq.same_sequence(&TokenSequence::new()));
    }

    #[test]
    fn the_global_sequence_is_shared() {
        let a = TokenSequence::global();
        let b = TokenSequence::global();
        assert!(a.same_sequence(&b));
        assert_ne!(a.next_token(), b.next_token());
    }

    #[test]
    fn literals_get_tokens_and_placeholders_pass_through() {
        let mut binder = ParameterBinder::new(TokenSequence::new());
        assert_eq!(binder.bind(Arg::from(5)).unwrap(), ":0");
        assert_eq!(binder.bind(param(":scene_1")).unwrap(), ":scene_1");
        assert_eq!(binder.bind(param("?")).unwrap(), "?");
        assert_eq!(binder.len(), 1);
        assert_eq!(binder.get(":0"), Some(&Value::Int(5)));
        assert!(binder.bind(param("scene")).unwrap_err().is_compilation());
    }

    #[test]
    fn list_and_range_shapes() {
        let mut binder = ParameterBinder::new(TokenSequence::new());
        let list = binder
            .bind_list(vec![Arg::from(1), Arg::from(2), Arg::from(3)])
            .unwrap();
        assert_eq!(list, "(:0,:1,:2)");
        let range = binder.bind_range(Arg::from("23"), Arg::from("33")).unwrap();
        assert_eq!(range, ":3 and :4");
        assert_eq!(binder.get(":4"), Some(&Value::Text("33".into())));
    }

    #[test]
    fn absorbing_a_conflicting_token_is_a_mismatch() {
        let seq = TokenSequence::new();
        let mut a = ParameterBinder::new(seq.clone());
        a.bind(Arg::from(1)).unwrap();

        let mut b = ParameterBinder::new(TokenSequence::new());
        b.bind(Arg::from(2)).unwrap();

        assert!(a.absorb(b).unwrap_err().is_binding_mismatch());

        let mut c = ParameterBinder::new(seq);
        c.bind(Arg::from(3)).unwrap();
        a.absorb(c).unwrap();
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn placeholder_syntax() {
        assert!(is_placeholder("?"));
        assert!(is_placeholder(":email"));
        assert!(!is_placeholder(":"));
        assert!(!is_placeholder(":a-b"));
        assert!(!is_placeholder("email"));
    }
}
