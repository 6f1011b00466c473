//! Builder state and chainable mutators.

use super::cond::Cond;
use super::param::ParameterBinder;
use super::{Direction, JoinType, Lock, Op, SqlType, UnionType};
use crate::error::{DbError, DbResult};
use crate::ident::format_field;
use crate::model::Model;
use crate::statement::{Bindings, inline_positional};
use crate::value::{Arg, Value};
use std::fmt;

/// Single-use SQL builder bound to a [`Model`].
///
/// Every mutator consumes and returns the builder. The first mutator error is
/// kept and reported by the terminal operation.
pub struct QueryBuilder<E> {
    pub(super) model: Model<E>,
    pub(super) sql_type: Option<SqlType>,
    pub(super) select: Option<String>,
    pub(super) from: Option<String>,
    pub(super) join: Option<String>,
    pub(super) filter: Option<String>,
    pub(super) group: Option<String>,
    pub(super) having: Option<String>,
    pub(super) order: Option<String>,
    pub(super) limit: Option<String>,
    pub(super) lock: Option<Lock>,
    pub(super) data: Option<String>,
    pub(super) unions: Vec<(UnionType, String)>,
    pub(super) binder: ParameterBinder,
    pub(super) caller: Bindings,
    pub(super) error: Option<DbError>,
}

impl<E> fmt::Debug for QueryBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("table", &self.model.table())
            .field("sql_type", &self.sql_type)
            .field("select", &self.select)
            .field("from", &self.from)
            .field("join", &self.join)
            .field("where", &self.filter)
            .field("group", &self.group)
            .field("having", &self.having)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("lock", &self.lock)
            .field("data", &self.data)
            .field("unions", &self.unions)
            .field("bindings", &self.binder.len())
            .field("error", &self.error)
            .finish()
    }
}

fn append(slot: &mut Option<String>, sep: &str, part: &str) {
    match slot {
        Some(existing) => {
            existing.push_str(sep);
            existing.push_str(part);
        }
        None => *slot = Some(part.to_string()),
    }
}

fn format_fields<I, S>(fields: I) -> DbResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| format_field(f.as_ref()))
        .collect()
}

impl<E> QueryBuilder<E> {
    /// Create an empty builder for `model`. Prefer [`Model::query`].
    pub fn new(model: Model<E>) -> Self {
        let binder = ParameterBinder::new(model.tokens().clone());
        Self {
            model,
            sql_type: None,
            select: None,
            from: None,
            join: None,
            filter: None,
            group: None,
            having: None,
            order: None,
            limit: None,
            lock: None,
            data: None,
            unions: Vec::new(),
            binder,
            caller: Bindings::new(),
            error: None,
        }
    }

    /// A new, empty builder on the same table, executor and token sequence.
    pub fn fresh(&self) -> Self {
        Self::new(self.model.clone())
    }

    /// The model this builder belongs to.
    pub fn model(&self) -> &Model<E> {
        &self.model
    }

    /// Literal bindings allocated so far.
    pub fn bindings(&self) -> &ParameterBinder {
        &self.binder
    }

    fn apply(mut self, f: impl FnOnce(&mut Self) -> DbResult<()>) -> Self {
        if self.error.is_none() {
            if let Err(err) = f(&mut self) {
                self.error = Some(err);
            }
        }
        self
    }

    fn push_where(&mut self, conj: &str, cond: &str) {
        append(&mut self.filter, conj, cond);
    }

    // ==================== SELECT / FROM ====================

    /// Append selected fields; each one is formatted with back-quotes.
    pub fn select<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.apply(|qb| {
            let fields = format_fields(fields)?;
            if !fields.is_empty() {
                append(&mut qb.select, ", ", &fields.join(", "));
            }
            Ok(())
        })
    }

    /// Append a raw select expression (not quoted).
    pub fn select_raw(mut self, expr: &str) -> Self {
        append(&mut self.select, ", ", expr);
        self
    }

    /// Replace the FROM target (defaults to the model's table).
    pub fn from(mut self, expr: &str) -> Self {
        self.from = Some(expr.to_string());
        self
    }

    // ==================== WHERE ====================

    /// `field = value`
    pub fn where_eq(self, field: &str, value: impl Into<Arg>) -> Self {
        self.where_cond(field, Cond::Eq(value.into()))
    }

    /// `field <op> value`
    pub fn where_op(self, field: &str, op: Op, value: impl Into<Arg>) -> Self {
        self.where_cond(field, Cond::Cmp(op, value.into()))
    }

    /// `field in (...)`
    pub fn where_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Arg>,
    {
        self.where_cond(field, Cond::in_list(values))
    }

    /// `field not in (...)`
    pub fn where_not_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Arg>,
    {
        self.where_cond(field, Cond::not_in(values))
    }

    /// `field between low and high`
    pub fn where_between(self, field: &str, low: impl Into<Arg>, high: impl Into<Arg>) -> Self {
        self.where_cond(field, Cond::between(low, high))
    }

    /// `field not between low and high`
    pub fn where_not_between(
        self,
        field: &str,
        low: impl Into<Arg>,
        high: impl Into<Arg>,
    ) -> Self {
        self.where_cond(field, Cond::not_between(low, high))
    }

    pub fn where_null(self, field: &str) -> Self {
        self.where_cond(field, Cond::Null)
    }

    pub fn where_not_null(self, field: &str) -> Self {
        self.where_cond(field, Cond::NotNull)
    }

    /// `a <op> b` between two columns; neither side is tokenized.
    pub fn where_column(self, left: &str, op: Op, right: &str) -> Self {
        self.where_cond(left, Cond::Column(op, right.to_string()))
    }

    /// A raw WHERE fragment, appended verbatim.
    ///
    /// Never splice untrusted input here; use a placeholder and [`bind`](Self::bind).
    pub fn where_raw(mut self, sql: &str) -> Self {
        if self.error.is_none() {
            self.push_where(" AND ", sql);
        }
        self
    }

    /// Add one condition on `field`, AND-ed to the chain.
    pub fn where_cond(self, field: &str, cond: Cond) -> Self {
        self.apply(|qb| {
            let sql = cond.render(field, &mut qb.binder)?;
            qb.push_where(" AND ", &sql);
            Ok(())
        })
    }

    /// Add several conditions, AND-ed in iteration order.
    pub fn where_map<I, S>(self, conditions: I) -> Self
    where
        I: IntoIterator<Item = (S, Cond)>,
        S: AsRef<str>,
    {
        conditions
            .into_iter()
            .fold(self, |qb, (field, cond)| qb.where_cond(field.as_ref(), cond))
    }

    /// OR a parenthesized group built by `f` on a fresh builder.
    ///
    /// `where_eq("a", 1).or_where(|q| q.where_column("c", Op::Gt, "d")).where_eq("b", 2)`
    /// compiles to `` `a` = :0 OR (`c` > `d`) AND `b` = :1 ``.
    pub fn or_where(self, f: impl FnOnce(Self) -> Self) -> Self {
        self.nested(" OR ", f)
    }

    /// AND a parenthesized group built by `f` on a fresh builder.
    pub fn where_group(self, f: impl FnOnce(Self) -> Self) -> Self {
        self.nested(" AND ", f)
    }

    fn nested(self, conj: &str, f: impl FnOnce(Self) -> Self) -> Self {
        if self.error.is_some() {
            return self;
        }
        let sub = f(self.fresh());
        self.apply(|qb| {
            let mut compiled = sub.compile()?;
            qb.binder.absorb(compiled.bindings)?;
            let positional = compiled.caller.take_positional();
            let sql = inline_positional(compiled.sql.trim(), positional, &mut qb.binder)?;
            qb.caller.extend(compiled.caller);
            if !sql.is_empty() {
                qb.push_where(conj, &format!("({sql})"));
            }
            Ok(())
        })
    }

    // ==================== DATA ====================

    /// Append `field = value` assignments for insert / update / replace.
    pub fn data<I, K, V>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Arg>,
    {
        self.apply(|qb| {
            for (field, value) in pairs {
                let field = format_field(field.as_ref())?;
                let token = qb.binder.bind(value.into())?;
                append(&mut qb.data, ", ", &format!("{field} = {token}"));
            }
            Ok(())
        })
    }

    /// Append `field = <expr>` with a raw right-hand side.
    pub fn data_raw(self, field: &str, expr: &str) -> Self {
        self.apply(|qb| {
            let field = format_field(field)?;
            append(&mut qb.data, ", ", &format!("{field} = {expr}"));
            Ok(())
        })
    }

    // ==================== JOIN / GROUP / ORDER / LIMIT ====================

    /// `<type> join <table> on <left> <op> <right>`
    pub fn join(self, table: &str, left: &str, op: Op, right: &str, kind: JoinType) -> Self {
        self.apply(|qb| {
            let sql = format!(
                "{} {} on {} {} {}",
                kind.as_sql(),
                format_field(table)?,
                format_field(left)?,
                op.as_sql(),
                format_field(right)?
            );
            append(&mut qb.join, " ", &sql);
            Ok(())
        })
    }

    pub fn group<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.apply(|qb| {
            let fields = format_fields(fields)?;
            if !fields.is_empty() {
                append(&mut qb.group, ",", &fields.join(","));
            }
            Ok(())
        })
    }

    /// Raw HAVING expression; repeated calls are AND-ed.
    pub fn having(mut self, expr: &str) -> Self {
        append(&mut self.having, " AND ", expr);
        self
    }

    pub fn order(self, field: &str) -> Self {
        self.order_by(field, Direction::Asc)
    }

    pub fn order_desc(self, field: &str) -> Self {
        self.order_by(field, Direction::Desc)
    }

    pub fn order_by(self, field: &str, direction: Direction) -> Self {
        self.apply(|qb| {
            let sql = format!("{} {}", format_field(field)?, direction.as_sql());
            append(&mut qb.order, ", ", &sql);
            Ok(())
        })
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n.to_string());
        self
    }

    /// `limit offset,n`
    pub fn limit_offset(mut self, offset: u64, n: u64) -> Self {
        self.limit = Some(format!("{offset},{n}"));
        self
    }

    pub fn lock(mut self, mode: Lock) -> Self {
        self.lock = Some(mode);
        self
    }

    // ==================== UNION ====================

    /// Append `UNION (<other>)`; `other` compiles as a select.
    pub fn union(self, other: QueryBuilder<E>, kind: UnionType) -> Self {
        self.apply(|qb| {
            let mut compiled = other.compile_as(SqlType::Select)?;
            qb.binder.absorb(compiled.bindings)?;
            let positional = compiled.caller.take_positional();
            let sql = inline_positional(&compiled.sql, positional, &mut qb.binder)?;
            qb.caller.extend(compiled.caller);
            qb.unions.push((kind, sql));
            Ok(())
        })
    }

    /// Append `UNION (<sql>)` with hand-written SQL.
    pub fn union_raw(mut self, sql: &str, kind: UnionType) -> Self {
        self.unions.push((kind, sql.to_string()));
        self
    }

    // ==================== caller bindings ====================

    /// Supply the value of a caller `:name` placeholder.
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.caller = std::mem::take(&mut self.caller).bind(name, value);
        self
    }

    /// Supply the value of the next caller `?` placeholder.
    ///
    /// Values bound on a group or union member stay with that member's own
    /// `?`, whatever order the builders were chained in.
    pub fn bind_positional(mut self, value: impl Into<Value>) -> Self {
        self.caller = std::mem::take(&mut self.caller).push(value);
        self
    }

    /// Merge a prepared set of caller bindings.
    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.caller.extend(bindings);
        self
    }
}
