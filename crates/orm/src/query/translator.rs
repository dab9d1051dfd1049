//! Query translation
//!
//! Walks a composed query tree bottom-up, threading a scope that maps
//! logical field names to qualified columns, and emits one parameterized
//! SELECT statement plus a materializer describing how to shape the rows.
//!
//! Every literal is lifted into the parameter list; statement text never
//! contains an interpolated value, including skip/take counts.

use tracing::debug;

use super::expression::{
    Aggregate, CompareOp, FieldOrdering, Predicate, Query, QueryExpression,
};
use super::materializer::Materializer;
use crate::error::{OrmError, OrmResult};
use crate::schema::{Cardinality, EntityDescriptor, ModelRegistry};
use crate::value::DatabaseValue;

/// The output of translation: statement text, parameters, and the recipe
/// for shaping result rows
#[derive(Debug, Clone)]
pub struct TranslatedQuery {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
    pub materializer: Materializer,
}

/// Translates composed query trees against a registry's metadata
pub struct QueryTranslator<'r> {
    registry: &'r ModelRegistry,
}

impl<'r> QueryTranslator<'r> {
    /// Create a translator over the given registry
    pub fn new(registry: &'r ModelRegistry) -> Self {
        Self { registry }
    }

    /// Translate a query into statement text, parameters, and a materializer
    pub fn translate(&self, query: &Query) -> OrmResult<TranslatedQuery> {
        let plan = self.plan(query.expression())?;
        let translated = plan.into_sql()?;
        debug!(
            "translated query to {} ({} params)",
            translated.sql,
            translated.params.len()
        );
        Ok(translated)
    }

    fn plan(&self, expr: &QueryExpression) -> OrmResult<SelectPlan> {
        match expr {
            QueryExpression::Source { entity } => {
                let descriptor = self.registry.descriptor(entity)?;
                Ok(SelectPlan::source(descriptor))
            }
            QueryExpression::Filter { source, predicate } => {
                let mut plan = self.plan(source)?;
                plan.apply_filter(predicate)?;
                Ok(plan)
            }
            QueryExpression::Project { source, fields } => {
                let mut plan = self.plan(source)?;
                plan.apply_project(fields)?;
                Ok(plan)
            }
            QueryExpression::Join {
                source,
                relationship,
            } => {
                let mut plan = self.plan(source)?;
                plan.apply_join(self.registry, relationship)?;
                Ok(plan)
            }
            QueryExpression::OrderBy { source, orderings } => {
                let mut plan = self.plan(source)?;
                plan.apply_order_by(orderings)?;
                Ok(plan)
            }
            QueryExpression::Skip { source, count } => {
                let mut plan = self.plan(source)?;
                plan.skip = Some(*count);
                plan.limited = true;
                Ok(plan)
            }
            QueryExpression::Take { source, count } => {
                let mut plan = self.plan(source)?;
                plan.take = Some(*count);
                plan.limited = true;
                Ok(plan)
            }
            QueryExpression::GroupBy {
                source,
                keys,
                aggregates,
            } => {
                let mut plan = self.plan(source)?;
                plan.apply_group_by(keys, aggregates)?;
                Ok(plan)
            }
        }
    }
}

/// One scope binding: a logical field name and the SQL expression it maps to
#[derive(Debug, Clone)]
struct ScopeEntry {
    logical: String,
    expr: String,
}

/// The set of fields reachable at a point in the tree
#[derive(Debug, Clone)]
struct Scope {
    entries: Vec<ScopeEntry>,
    description: String,
}

impl Scope {
    fn resolve(&self, field: &str) -> OrmResult<&ScopeEntry> {
        self.entries
            .iter()
            .find(|e| e.logical == field)
            .ok_or_else(|| OrmError::UnboundField {
                field: field.to_string(),
                scope: self.description.clone(),
            })
    }

    fn retain(&mut self, fields: &[String]) {
        self.entries.retain(|e| fields.contains(&e.logical));
    }
}

/// A predicate with its fields resolved to SQL expressions
#[derive(Debug, Clone)]
enum SqlPredicate {
    Compare {
        expr: String,
        op: CompareOp,
        value: DatabaseValue,
    },
    Like {
        expr: String,
        pattern: String,
    },
    In {
        expr: String,
        values: Vec<DatabaseValue>,
    },
    Between {
        expr: String,
        low: DatabaseValue,
        high: DatabaseValue,
    },
    IsNull {
        expr: String,
    },
    IsNotNull {
        expr: String,
    },
    And(Box<SqlPredicate>, Box<SqlPredicate>),
    Or(Box<SqlPredicate>, Box<SqlPredicate>),
    Not(Box<SqlPredicate>),
}

fn resolve_predicate(predicate: &Predicate, scope: &Scope) -> OrmResult<SqlPredicate> {
    Ok(match predicate {
        Predicate::Compare { field, op, value } => SqlPredicate::Compare {
            expr: scope.resolve(field)?.expr.clone(),
            op: *op,
            value: value.clone(),
        },
        Predicate::Like { field, pattern } => SqlPredicate::Like {
            expr: scope.resolve(field)?.expr.clone(),
            pattern: pattern.clone(),
        },
        Predicate::In { field, values } => SqlPredicate::In {
            expr: scope.resolve(field)?.expr.clone(),
            values: values.clone(),
        },
        Predicate::Between { field, low, high } => SqlPredicate::Between {
            expr: scope.resolve(field)?.expr.clone(),
            low: low.clone(),
            high: high.clone(),
        },
        Predicate::IsNull { field } => SqlPredicate::IsNull {
            expr: scope.resolve(field)?.expr.clone(),
        },
        Predicate::IsNotNull { field } => SqlPredicate::IsNotNull {
            expr: scope.resolve(field)?.expr.clone(),
        },
        Predicate::And(a, b) => SqlPredicate::And(
            Box::new(resolve_predicate(a, scope)?),
            Box::new(resolve_predicate(b, scope)?),
        ),
        Predicate::Or(a, b) => SqlPredicate::Or(
            Box::new(resolve_predicate(a, scope)?),
            Box::new(resolve_predicate(b, scope)?),
        ),
        Predicate::Not(inner) => SqlPredicate::Not(Box::new(resolve_predicate(inner, scope)?)),
    })
}

/// Render a resolved predicate, appending parameters with `$n` placeholders
fn render_predicate(
    predicate: &SqlPredicate,
    sql: &mut String,
    params: &mut Vec<DatabaseValue>,
    counter: &mut usize,
) {
    let push_param = |params: &mut Vec<DatabaseValue>, counter: &mut usize, value: DatabaseValue| {
        params.push(value);
        let n = *counter;
        *counter += 1;
        format!("${}", n)
    };

    match predicate {
        SqlPredicate::Compare { expr, op, value } => {
            let placeholder = push_param(params, counter, value.clone());
            sql.push_str(&format!("{} {} {}", expr, op, placeholder));
        }
        SqlPredicate::Like { expr, pattern } => {
            let placeholder =
                push_param(params, counter, DatabaseValue::String(pattern.clone()));
            sql.push_str(&format!("{} LIKE {}", expr, placeholder));
        }
        SqlPredicate::In { expr, values } => {
            if values.is_empty() {
                // IN () has no SQL meaning; an empty list matches nothing
                sql.push_str("FALSE");
                return;
            }
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| push_param(params, counter, v.clone()))
                .collect();
            sql.push_str(&format!("{} IN ({})", expr, placeholders.join(", ")));
        }
        SqlPredicate::Between { expr, low, high } => {
            let low_ph = push_param(params, counter, low.clone());
            let high_ph = push_param(params, counter, high.clone());
            sql.push_str(&format!("{} BETWEEN {} AND {}", expr, low_ph, high_ph));
        }
        SqlPredicate::IsNull { expr } => {
            sql.push_str(&format!("{} IS NULL", expr));
        }
        SqlPredicate::IsNotNull { expr } => {
            sql.push_str(&format!("{} IS NOT NULL", expr));
        }
        SqlPredicate::And(a, b) => {
            sql.push('(');
            render_predicate(a, sql, params, counter);
            sql.push_str(" AND ");
            render_predicate(b, sql, params, counter);
            sql.push(')');
        }
        SqlPredicate::Or(a, b) => {
            sql.push('(');
            render_predicate(a, sql, params, counter);
            sql.push_str(" OR ");
            render_predicate(b, sql, params, counter);
            sql.push(')');
        }
        SqlPredicate::Not(inner) => {
            sql.push_str("NOT (");
            render_predicate(inner, sql, params, counter);
            sql.push(')');
        }
    }
}

/// One planned join
#[derive(Debug, Clone)]
struct JoinPlan {
    relationship: String,
    target_table: String,
    alias: String,
    join_kind: &'static str,
    on: Vec<(String, String)>,
    collection: bool,
}

/// Aggregation state once a GroupBy has been applied
#[derive(Debug, Clone)]
struct GroupPlan {
    key_exprs: Vec<String>,
}

/// Accumulated translation state for one SELECT statement
#[derive(Debug, Clone)]
struct SelectPlan {
    root_entity: String,
    root_table: String,
    root_alias: String,
    root_key_fields: Vec<String>,
    joins: Vec<JoinPlan>,
    scope: Scope,
    filters: Vec<SqlPredicate>,
    having: Vec<SqlPredicate>,
    group: Option<GroupPlan>,
    orderings: Vec<(String, super::expression::OrderDirection)>,
    skip: Option<i64>,
    take: Option<i64>,
    limited: bool,
}

impl SelectPlan {
    fn source(descriptor: &EntityDescriptor) -> Self {
        let alias = "t0".to_string();
        let entries = descriptor
            .columns()
            .iter()
            .map(|c| ScopeEntry {
                logical: c.name.clone(),
                expr: format!("{}.{}", alias, c.name),
            })
            .collect();
        Self {
            root_entity: descriptor.name().to_string(),
            root_table: descriptor.table().to_string(),
            root_alias: alias,
            root_key_fields: descriptor.key_columns().to_vec(),
            joins: Vec::new(),
            scope: Scope {
                entries,
                description: descriptor.name().to_string(),
            },
            filters: Vec::new(),
            having: Vec::new(),
            group: None,
            orderings: Vec::new(),
            skip: None,
            take: None,
            limited: false,
        }
    }

    fn apply_filter(&mut self, predicate: &Predicate) -> OrmResult<()> {
        if self.limited {
            return Err(OrmError::query_shape(
                "a filter cannot be applied after skip/take",
            ));
        }
        let resolved = resolve_predicate(predicate, &self.scope)?;
        if self.group.is_some() {
            self.having.push(resolved);
        } else {
            self.filters.push(resolved);
        }
        Ok(())
    }

    fn apply_project(&mut self, fields: &[String]) -> OrmResult<()> {
        for field in fields {
            self.scope.resolve(field)?;
        }
        self.scope.retain(fields);
        Ok(())
    }

    fn apply_join(&mut self, registry: &ModelRegistry, relationship: &str) -> OrmResult<()> {
        if self.limited {
            return Err(OrmError::query_shape(
                "a join cannot be applied after skip/take",
            ));
        }
        if self.group.is_some() {
            return Err(OrmError::query_shape(
                "a join cannot be applied after aggregation",
            ));
        }
        if self.joins.iter().any(|j| j.relationship == relationship) {
            return Err(OrmError::query_shape(format!(
                "relationship '{}' is already joined",
                relationship
            )));
        }

        let root = registry.descriptor(&self.root_entity)?;
        let rel = root.relationship(relationship).ok_or_else(|| {
            OrmError::query_shape(format!(
                "entity '{}' declares no relationship '{}'",
                self.root_entity, relationship
            ))
        })?;
        let target = registry.descriptor(&rel.target)?;

        let collection = rel.cardinality.is_collection();
        if collection && self.joins.iter().any(|j| j.collection) {
            return Err(OrmError::query_shape(
                "at most one collection relationship can be joined in a single query",
            ));
        }

        let alias = format!("t{}", self.joins.len() + 1);

        // BelongsTo: this side carries the foreign key. HasOne/HasMany: the
        // target does. The join kind follows nullability and cardinality.
        let (on, join_kind) = match rel.cardinality {
            Cardinality::BelongsTo => {
                let on = rel
                    .foreign_key
                    .iter()
                    .zip(target.key_columns())
                    .map(|(fk, key)| {
                        (
                            format!("{}.{}", self.root_alias, fk),
                            format!("{}.{}", alias, key),
                        )
                    })
                    .collect::<Vec<_>>();
                let any_nullable = rel
                    .foreign_key
                    .iter()
                    .any(|fk| root.column(fk).map(|c| c.nullable).unwrap_or(false));
                (on, if any_nullable { "LEFT JOIN" } else { "INNER JOIN" })
            }
            Cardinality::HasOne | Cardinality::HasMany => {
                let on = rel
                    .foreign_key
                    .iter()
                    .zip(root.key_columns())
                    .map(|(fk, key)| {
                        (
                            format!("{}.{}", alias, fk),
                            format!("{}.{}", self.root_alias, key),
                        )
                    })
                    .collect::<Vec<_>>();
                (on, "LEFT JOIN")
            }
        };

        // Joined fields enter the scope under "relationship.field" names.
        for column in target.columns() {
            self.scope.entries.push(ScopeEntry {
                logical: format!("{}.{}", relationship, column.name),
                expr: format!("{}.{}", alias, column.name),
            });
        }
        self.scope.description =
            format!("{} (joined: {})", self.scope.description, relationship);

        self.joins.push(JoinPlan {
            relationship: relationship.to_string(),
            target_table: target.table().to_string(),
            alias,
            join_kind,
            on,
            collection,
        });
        Ok(())
    }

    fn apply_order_by(&mut self, orderings: &[FieldOrdering]) -> OrmResult<()> {
        for ordering in orderings {
            let entry = self.scope.resolve(&ordering.field)?;
            self.orderings.push((entry.expr.clone(), ordering.direction));
        }
        Ok(())
    }

    fn apply_group_by(&mut self, keys: &[String], aggregates: &[Aggregate]) -> OrmResult<()> {
        if self.group.is_some() {
            return Err(OrmError::query_shape(
                "an aggregated tree cannot be aggregated again",
            ));
        }
        if self.limited {
            return Err(OrmError::query_shape(
                "an aggregate cannot be applied after skip/take",
            ));
        }
        if keys.is_empty() && aggregates.is_empty() {
            return Err(OrmError::query_shape(
                "a group-by needs at least one key or aggregate",
            ));
        }

        let mut key_exprs = Vec::with_capacity(keys.len());
        let mut entries = Vec::with_capacity(keys.len() + aggregates.len());
        for key in keys {
            let entry = self.scope.resolve(key)?;
            key_exprs.push(entry.expr.clone());
            entries.push(ScopeEntry {
                logical: key.clone(),
                expr: entry.expr.clone(),
            });
        }
        for aggregate in aggregates {
            let inner = match &aggregate.field {
                Some(field) => self.scope.resolve(field)?.expr.clone(),
                None => "*".to_string(),
            };
            entries.push(ScopeEntry {
                logical: aggregate.alias.clone(),
                expr: format!("{}({})", aggregate.function, inner),
            });
        }

        self.scope = Scope {
            entries,
            description: format!("group of {}", self.scope.description),
        };
        self.group = Some(GroupPlan { key_exprs });
        // Orderings resolved before grouping refer to pre-group columns,
        // which no longer exist in the output; drop them.
        self.orderings.clear();
        Ok(())
    }

    fn into_sql(self) -> OrmResult<TranslatedQuery> {
        let mut sql = String::new();
        let mut params: Vec<DatabaseValue> = Vec::new();
        let mut counter: usize = 1;

        sql.push_str("SELECT ");
        let select_list: Vec<String> = self
            .scope
            .entries
            .iter()
            .map(|e| format!("{} AS \"{}\"", e.expr, e.logical))
            .collect();
        if select_list.is_empty() {
            return Err(OrmError::query_shape("the query selects no fields"));
        }
        sql.push_str(&select_list.join(", "));

        sql.push_str(&format!(" FROM {} {}", self.root_table, self.root_alias));

        for join in &self.joins {
            sql.push_str(&format!(
                " {} {} {} ON ",
                join.join_kind, join.target_table, join.alias
            ));
            let on: Vec<String> = join
                .on
                .iter()
                .map(|(left, right)| format!("{} = {}", left, right))
                .collect();
            sql.push_str(&on.join(" AND "));
        }

        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            for (i, predicate) in self.filters.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                render_predicate(predicate, &mut sql, &mut params, &mut counter);
            }
        }

        if let Some(group) = &self.group {
            if !group.key_exprs.is_empty() {
                sql.push_str(&format!(" GROUP BY {}", group.key_exprs.join(", ")));
            }
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            for (i, predicate) in self.having.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                render_predicate(predicate, &mut sql, &mut params, &mut counter);
            }
        }

        if !self.orderings.is_empty() {
            sql.push_str(" ORDER BY ");
            let order: Vec<String> = self
                .orderings
                .iter()
                .map(|(expr, direction)| format!("{} {}", expr, direction))
                .collect();
            sql.push_str(&order.join(", "));
        }

        if let Some(take) = self.take {
            params.push(DatabaseValue::Int64(take));
            sql.push_str(&format!(" LIMIT ${}", counter));
            counter += 1;
        }
        if let Some(skip) = self.skip {
            params.push(DatabaseValue::Int64(skip));
            sql.push_str(&format!(" OFFSET ${}", counter));
        }

        let materializer = self.materializer()?;
        Ok(TranslatedQuery {
            sql,
            params,
            materializer,
        })
    }

    fn materializer(&self) -> OrmResult<Materializer> {
        let fields: Vec<String> = self
            .scope
            .entries
            .iter()
            .map(|e| e.logical.clone())
            .collect();

        if self.group.is_some() {
            return Ok(Materializer::Rows { fields });
        }

        if let Some(join) = self.joins.iter().find(|j| j.collection) {
            let prefix = format!("{}.", join.relationship);
            let parent_fields: Vec<String> = fields
                .iter()
                .filter(|f| !f.starts_with(&prefix))
                .cloned()
                .collect();
            let child_fields: Vec<String> = fields
                .iter()
                .filter(|f| f.starts_with(&prefix))
                .cloned()
                .collect();
            for key in &self.root_key_fields {
                if !parent_fields.contains(key) {
                    return Err(OrmError::query_shape(format!(
                        "a projection over a collection join must keep the source key field '{}'",
                        key
                    )));
                }
            }
            return Ok(Materializer::Nested {
                relationship: join.relationship.clone(),
                parent_fields,
                parent_key_fields: self.root_key_fields.clone(),
                child_fields,
            });
        }

        Ok(Materializer::Rows { fields })
    }
}
