//! Query expression trees
//!
//! A `Query` is an immutable composed tree. Builder methods consume the
//! query and return a new one wrapping the previous root, so composition
//! produces new nodes and never mutates existing ones; each node owns its
//! children and trees are acyclic by construction.

use std::fmt;

use crate::value::DatabaseValue;

/// One node of a composed query tree
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpression {
    /// The root entity the query reads from
    Source { entity: String },
    /// Restrict rows by a predicate (WHERE, or HAVING over a grouped tree)
    Filter {
        source: Box<QueryExpression>,
        predicate: Predicate,
    },
    /// Narrow the output to the named fields
    Project {
        source: Box<QueryExpression>,
        fields: Vec<String>,
    },
    /// Follow a declared relationship of the source entity
    Join {
        source: Box<QueryExpression>,
        relationship: String,
    },
    /// Impose an explicit result order
    OrderBy {
        source: Box<QueryExpression>,
        orderings: Vec<FieldOrdering>,
    },
    /// Skip the first `count` rows
    Skip {
        source: Box<QueryExpression>,
        count: i64,
    },
    /// Keep at most `count` rows
    Take {
        source: Box<QueryExpression>,
        count: i64,
    },
    /// Partition rows and compute aggregates inside the statement
    GroupBy {
        source: Box<QueryExpression>,
        keys: Vec<String>,
        aggregates: Vec<Aggregate>,
    },
}

/// One ORDER BY entry
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOrdering {
    pub field: String,
    pub direction: OrderDirection,
}

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Aggregate functions computed by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "COUNT"),
            AggregateFunction::Sum => write!(f, "SUM"),
            AggregateFunction::Avg => write!(f, "AVG"),
            AggregateFunction::Min => write!(f, "MIN"),
            AggregateFunction::Max => write!(f, "MAX"),
        }
    }
}

/// One aggregate column of a grouped query
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    /// Field the aggregate is computed over; `None` means `COUNT(*)`
    pub field: Option<String>,
    /// Name the aggregate is exposed under in the result scope
    pub alias: String,
}

impl Aggregate {
    /// `COUNT(*)` exposed as `alias`
    pub fn count(alias: &str) -> Self {
        Self {
            function: AggregateFunction::Count,
            field: None,
            alias: alias.to_string(),
        }
    }

    /// `SUM(field)` exposed as `alias`
    pub fn sum(field: &str, alias: &str) -> Self {
        Self::over(AggregateFunction::Sum, field, alias)
    }

    /// `AVG(field)` exposed as `alias`
    pub fn avg(field: &str, alias: &str) -> Self {
        Self::over(AggregateFunction::Avg, field, alias)
    }

    /// `MIN(field)` exposed as `alias`
    pub fn min(field: &str, alias: &str) -> Self {
        Self::over(AggregateFunction::Min, field, alias)
    }

    /// `MAX(field)` exposed as `alias`
    pub fn max(field: &str, alias: &str) -> Self {
        Self::over(AggregateFunction::Max, field, alias)
    }

    fn over(function: AggregateFunction, field: &str, alias: &str) -> Self {
        Self {
            function,
            field: Some(field.to_string()),
            alias: alias.to_string(),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "="),
            CompareOp::Ne => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
        }
    }
}

/// A filter predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: DatabaseValue,
    },
    Like {
        field: String,
        pattern: String,
    },
    In {
        field: String,
        values: Vec<DatabaseValue>,
    },
    Between {
        field: String,
        low: DatabaseValue,
        high: DatabaseValue,
    },
    IsNull {
        field: String,
    },
    IsNotNull {
        field: String,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// `field = value`
    pub fn eq(field: &str, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// `field != value`
    pub fn ne(field: &str, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    /// `field > value`
    pub fn gt(field: &str, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    /// `field >= value`
    pub fn gte(field: &str, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    /// `field < value`
    pub fn lt(field: &str, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    /// `field <= value`
    pub fn lte(field: &str, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    /// `field LIKE pattern`
    pub fn like(field: &str, pattern: &str) -> Self {
        Predicate::Like {
            field: field.to_string(),
            pattern: pattern.to_string(),
        }
    }

    /// `field IN (values...)`
    pub fn is_in(field: &str, values: Vec<DatabaseValue>) -> Self {
        Predicate::In {
            field: field.to_string(),
            values,
        }
    }

    /// `field BETWEEN low AND high`
    pub fn between(
        field: &str,
        low: impl Into<DatabaseValue>,
        high: impl Into<DatabaseValue>,
    ) -> Self {
        Predicate::Between {
            field: field.to_string(),
            low: low.into(),
            high: high.into(),
        }
    }

    /// `field IS NULL`
    pub fn is_null(field: &str) -> Self {
        Predicate::IsNull {
            field: field.to_string(),
        }
    }

    /// `field IS NOT NULL`
    pub fn is_not_null(field: &str) -> Self {
        Predicate::IsNotNull {
            field: field.to_string(),
        }
    }

    /// Both predicates must hold
    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// Either predicate must hold
    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// Negate this predicate
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    fn compare(field: &str, op: CompareOp, value: impl Into<DatabaseValue>) -> Self {
        Predicate::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }
}

/// A composed, immutable query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    root: QueryExpression,
}

impl Query {
    /// Start a query over the named entity
    pub fn from(entity: &str) -> Self {
        Self {
            root: QueryExpression::Source {
                entity: entity.to_string(),
            },
        }
    }

    /// Restrict rows by a predicate
    pub fn filter(self, predicate: Predicate) -> Self {
        Self {
            root: QueryExpression::Filter {
                source: Box::new(self.root),
                predicate,
            },
        }
    }

    /// Narrow the output to the named fields
    pub fn project(self, fields: &[&str]) -> Self {
        Self {
            root: QueryExpression::Project {
                source: Box::new(self.root),
                fields: fields.iter().map(|f| f.to_string()).collect(),
            },
        }
    }

    /// Follow a declared relationship of the source entity
    pub fn join(self, relationship: &str) -> Self {
        Self {
            root: QueryExpression::Join {
                source: Box::new(self.root),
                relationship: relationship.to_string(),
            },
        }
    }

    /// Order ascending by `field`; later calls append further orderings
    pub fn order_by(self, field: &str) -> Self {
        self.push_ordering(field, OrderDirection::Asc)
    }

    /// Order descending by `field`; later calls append further orderings
    pub fn order_by_desc(self, field: &str) -> Self {
        self.push_ordering(field, OrderDirection::Desc)
    }

    /// Skip the first `count` rows
    pub fn skip(self, count: i64) -> Self {
        Self {
            root: QueryExpression::Skip {
                source: Box::new(self.root),
                count,
            },
        }
    }

    /// Keep at most `count` rows
    pub fn take(self, count: i64) -> Self {
        Self {
            root: QueryExpression::Take {
                source: Box::new(self.root),
                count,
            },
        }
    }

    /// Partition by `keys` and compute `aggregates` inside the statement
    pub fn group_by(self, keys: &[&str], aggregates: Vec<Aggregate>) -> Self {
        Self {
            root: QueryExpression::GroupBy {
                source: Box::new(self.root),
                keys: keys.iter().map(|k| k.to_string()).collect(),
                aggregates,
            },
        }
    }

    /// The underlying expression tree
    pub fn expression(&self) -> &QueryExpression {
        &self.root
    }

    fn push_ordering(self, field: &str, direction: OrderDirection) -> Self {
        let ordering = FieldOrdering {
            field: field.to_string(),
            direction,
        };
        // Appending to an OrderBy root builds a replacement node rather
        // than nesting one OrderBy per field.
        match self.root {
            QueryExpression::OrderBy {
                source,
                mut orderings,
            } => {
                orderings.push(ordering);
                Self {
                    root: QueryExpression::OrderBy { source, orderings },
                }
            }
            other => Self {
                root: QueryExpression::OrderBy {
                    source: Box::new(other),
                    orderings: vec![ordering],
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composition_builds_new_nodes() {
        let base = Query::from("authors");
        let filtered = base.clone().filter(Predicate::eq("name", "someone"));
        // The original tree is untouched by composition
        assert_eq!(base, Query::from("authors"));
        assert!(matches!(
            filtered.expression(),
            QueryExpression::Filter { .. }
        ));
    }

    #[test]
    fn test_order_by_appends() {
        let query = Query::from("books").order_by("title").order_by_desc("id");
        match query.expression() {
            QueryExpression::OrderBy { orderings, .. } => {
                assert_eq!(orderings.len(), 2);
                assert_eq!(orderings[1].direction, OrderDirection::Desc);
            }
            other => panic!("expected OrderBy root, got {:?}", other),
        }
    }

    #[test]
    fn test_predicate_combinators() {
        let p = Predicate::eq("a", 1i64)
            .and(Predicate::gt("b", 2i64))
            .or(Predicate::is_null("c"));
        assert!(matches!(p, Predicate::Or(_, _)));
    }
}
