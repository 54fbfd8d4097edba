//! Join, select and WHERE clauses accumulated while compiling an expression.

use crate::value::SearchValueKind;

use super::fragment::SqlFragment;
use super::row::ColumnType;

/// A `LEFT JOIN` onto one of the participant tables.
///
/// Two joins are the same join when they share alias and table; resolvers
/// derive aliases deterministically so identical lookups collapse into one.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: String,
    pub alias: String,
    pub on: SqlFragment,
}

impl JoinClause {
    pub fn left(table: impl Into<String>, alias: impl Into<String>, on: SqlFragment) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            on,
        }
    }

    fn same_as(&self, other: &JoinClause) -> bool {
        self.alias == other.alias && self.table == other.table
    }

    pub fn to_fragment(&self) -> SqlFragment {
        let mut fragment = SqlFragment::raw(format!("LEFT JOIN {} {} ON ", self.table, self.alias));
        fragment.append(self.on.clone());
        fragment
    }
}

/// A column of a joined table to return with each matched enrollee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectClause {
    pub alias: String,
    pub column: String,
    pub kind: SearchValueKind,
}

impl SelectClause {
    pub fn new(alias: impl Into<String>, column: impl Into<String>, kind: SearchValueKind) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
            kind,
        }
    }

    /// The result column label, `alias__column`.
    pub fn label(&self) -> String {
        format!("{}__{}", self.alias, self.column)
    }

    pub fn column_type(&self) -> ColumnType {
        ColumnType::for_kind(self.kind)
    }

    pub fn to_sql(&self) -> String {
        format!("{}.{} AS {}", self.alias, self.column, self.label())
    }
}

/// A WHERE condition tree mirroring the boolean structure of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    Condition(SqlFragment),
    Not(Box<WhereClause>),
    And(Box<WhereClause>, Box<WhereClause>),
    Or(Box<WhereClause>, Box<WhereClause>),
}

impl WhereClause {
    /// A condition matching every row.
    pub fn always() -> Self {
        WhereClause::Condition(SqlFragment::raw("1 = 1"))
    }

    /// A condition matching no row.
    pub fn never() -> Self {
        WhereClause::Condition(SqlFragment::raw("1 = 0"))
    }

    pub fn to_fragment(&self) -> SqlFragment {
        match self {
            WhereClause::Condition(fragment) => fragment.clone(),
            WhereClause::Not(inner) => SqlFragment::wrap("NOT (", inner.to_fragment(), ")"),
            WhereClause::And(left, right) => left.to_fragment().and(right.to_fragment()),
            WhereClause::Or(left, right) => left.to_fragment().or(right.to_fragment()),
        }
    }
}

/// The compiled form of an expression: deduplicated joins and selects plus
/// the WHERE tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlSearch {
    joins: Vec<JoinClause>,
    selects: Vec<SelectClause>,
    condition: WhereClause,
}

impl SqlSearch {
    pub fn new(condition: WhereClause) -> Self {
        Self {
            joins: Vec::new(),
            selects: Vec::new(),
            condition,
        }
    }

    /// Adds a join unless an identical alias/table pair is already present.
    pub fn add_join(&mut self, join: JoinClause) {
        if !self.joins.iter().any(|j| j.same_as(&join)) {
            self.joins.push(join);
        }
    }

    /// Adds a select unless the alias/column pair is already present.
    pub fn add_select(&mut self, select: SelectClause) {
        if !self
            .selects
            .iter()
            .any(|s| s.alias == select.alias && s.column == select.column)
        {
            self.selects.push(select);
        }
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn selects(&self) -> &[SelectClause] {
        &self.selects
    }

    pub fn condition(&self) -> &WhereClause {
        &self.condition
    }

    /// Wraps the condition in NOT, keeping joins and selects.
    pub fn negate(self) -> Self {
        Self {
            condition: WhereClause::Not(Box::new(self.condition)),
            ..self
        }
    }

    pub fn and(self, other: SqlSearch) -> Self {
        self.merge(other, |l, r| WhereClause::And(Box::new(l), Box::new(r)))
    }

    pub fn or(self, other: SqlSearch) -> Self {
        self.merge(other, |l, r| WhereClause::Or(Box::new(l), Box::new(r)))
    }

    fn merge(
        self,
        other: SqlSearch,
        combine: impl FnOnce(WhereClause, WhereClause) -> WhereClause,
    ) -> Self {
        let mut merged = SqlSearch::new(combine(self.condition, other.condition));
        for join in self.joins.into_iter().chain(other.joins) {
            merged.add_join(join);
        }
        for select in self.selects.into_iter().chain(other.selects) {
            merged.add_select(select);
        }
        merged
    }
}
