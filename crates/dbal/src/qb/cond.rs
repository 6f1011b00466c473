//! Per-field WHERE conditions.

use super::Op;
use super::param::ParameterBinder;
use crate::error::DbResult;
use crate::ident::format_field;
use crate::value::Arg;

/// One condition on a field, as accepted by
/// [`QueryBuilder::where_map`](super::QueryBuilder::where_map).
///
/// ```ignore
/// users.query().where_map([
///     ("status", Cond::in_list([1, 2])),
///     ("age", Cond::between(23, 33)),
///     ("deleted_at", Cond::is_null()),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// `field = value`
    Eq(Arg),
    /// `field <op> value`
    Cmp(Op, Arg),
    /// `field in (...)`
    In(Vec<Arg>),
    /// `field not in (...)`
    NotIn(Vec<Arg>),
    /// `field between low and high`
    Between(Arg, Arg),
    /// `field not between low and high`
    NotBetween(Arg, Arg),
    /// `field is null`
    Null,
    /// `field is not null`
    NotNull,
    /// `field <op> other_field`, neither side tokenized
    Column(Op, String),
}

impl Cond {
    pub fn eq(value: impl Into<Arg>) -> Self {
        Cond::Eq(value.into())
    }

    pub fn cmp(op: Op, value: impl Into<Arg>) -> Self {
        Cond::Cmp(op, value.into())
    }

    pub fn in_list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Arg>,
    {
        Cond::In(values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Arg>,
    {
        Cond::NotIn(values.into_iter().map(Into::into).collect())
    }

    pub fn between(low: impl Into<Arg>, high: impl Into<Arg>) -> Self {
        Cond::Between(low.into(), high.into())
    }

    pub fn not_between(low: impl Into<Arg>, high: impl Into<Arg>) -> Self {
        Cond::NotBetween(low.into(), high.into())
    }

    pub fn is_null() -> Self {
        Cond::Null
    }

    pub fn is_not_null() -> Self {
        Cond::NotNull
    }

    pub fn column(op: Op, other: impl Into<String>) -> Self {
        Cond::Column(op, other.into())
    }

    /// Render `field <condition>`, binding literal operands.
    pub(crate) fn render(self, field: &str, binder: &mut ParameterBinder) -> DbResult<String> {
        let field = format_field(field)?;
        let sql = match self {
            Cond::Eq(value) => format!("{field} = {}", binder.bind(value)?),
            Cond::Cmp(op, value) => format!("{field} {} {}", op.as_sql(), binder.bind(value)?),
            // An empty list matches nothing; an empty exclusion matches everything.
            Cond::In(values) if values.is_empty() => "0 = 1".to_string(),
            Cond::NotIn(values) if values.is_empty() => "1 = 1".to_string(),
            Cond::In(values) => format!("{field} in {}", binder.bind_list(values)?),
            Cond::NotIn(values) => format!("{field} not in {}", binder.bind_list(values)?),
            Cond::Between(low, high) => {
                format!("{field} between {}", binder.bind_range(low, high)?)
            }
            Cond::NotBetween(low, high) => {
                format!("{field} not between {}", binder.bind_range(low, high)?)
            }
            Cond::Null => format!("{field} is null"),
            Cond::NotNull => format!("{field} is not null"),
            Cond::Column(op, other) => {
                format!("{field} {} {}", op.as_sql(), format_field(&other)?)
            }
        };
        Ok(sql)
    }
}
