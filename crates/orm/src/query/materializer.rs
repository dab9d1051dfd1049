//! Result materialization
//!
//! A `Materializer` is produced by translation and describes how result rows
//! map back to objects: flat rows for projections, grouped results and
//! scalar joins, or parent objects with a nested collection when a HasMany
//! relationship was joined.

use serde_json::{Map, Value as JsonValue};

use crate::backend::DatabaseRow;
use crate::error::{OrmError, OrmResult};
use crate::value::{KeyTuple, KeyValue};

/// Recipe for shaping result rows into objects
#[derive(Debug, Clone, PartialEq)]
pub enum Materializer {
    /// One output object per row, field names as selected
    Rows { fields: Vec<String> },
    /// Parent objects with child rows nested under the relationship name.
    /// The statement flattens the join, so parents repeat once per child;
    /// rows are regrouped here by the parent key.
    Nested {
        relationship: String,
        parent_fields: Vec<String>,
        parent_key_fields: Vec<String>,
        child_fields: Vec<String>,
    },
}

impl Materializer {
    /// Shape fetched rows into JSON objects
    pub fn materialize(&self, rows: &[Box<dyn DatabaseRow>]) -> OrmResult<Vec<JsonValue>> {
        match self {
            Materializer::Rows { fields } => rows
                .iter()
                .map(|row| {
                    let mut object = Map::new();
                    for field in fields {
                        object.insert(field.clone(), row.get_by_name(field)?.to_json());
                    }
                    Ok(JsonValue::Object(object))
                })
                .collect(),
            Materializer::Nested {
                relationship,
                parent_fields,
                parent_key_fields,
                child_fields,
            } => {
                let mut order: Vec<KeyTuple> = Vec::new();
                let mut parents: std::collections::HashMap<KeyTuple, JsonValue> =
                    std::collections::HashMap::new();

                for row in rows {
                    let mut key = Vec::with_capacity(parent_key_fields.len());
                    for field in parent_key_fields {
                        let value = row.get_by_name(field)?;
                        let key_value =
                            KeyValue::from_database_value(&value).ok_or_else(|| {
                                OrmError::storage(
                                    "materialize",
                                    format!("key field '{}' holds a non-key value", field),
                                )
                            })?;
                        key.push(key_value);
                    }

                    if !parents.contains_key(&key) {
                        let mut object = Map::new();
                        for field in parent_fields {
                            object.insert(field.clone(), row.get_by_name(field)?.to_json());
                        }
                        object.insert(relationship.clone(), JsonValue::Array(Vec::new()));
                        order.push(key.clone());
                        parents.insert(key.clone(), JsonValue::Object(object));
                    }
                    let parent = parents.get_mut(&key).expect("keyed parent");

                    // A LEFT JOIN with no child leaves every child column null
                    let mut child = Map::new();
                    let mut all_null = true;
                    for field in child_fields {
                        let value = row.get_by_name(field)?;
                        if !value.is_null() {
                            all_null = false;
                        }
                        let local = field
                            .strip_prefix(&format!("{}.", relationship))
                            .unwrap_or(field);
                        child.insert(local.to_string(), value.to_json());
                    }
                    if !all_null {
                        if let Some(JsonValue::Array(children)) = parent
                            .as_object_mut()
                            .and_then(|o| o.get_mut(relationship))
                        {
                            children.push(JsonValue::Object(child));
                        }
                    }
                }

                Ok(order
                    .into_iter()
                    .map(|key| parents.remove(&key).expect("keyed parent"))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{row, ScriptedRow};
    use crate::value::DatabaseValue;

    fn boxed(values: crate::backend::testing::RowValues) -> Box<dyn DatabaseRow> {
        Box::new(ScriptedRow::from_values(values))
    }

    #[test]
    fn test_flat_rows() {
        let materializer = Materializer::Rows {
            fields: vec!["id".to_string(), "name".to_string()],
        };
        let rows = vec![boxed(row(&[
            ("id", DatabaseValue::Int64(1)),
            ("name", DatabaseValue::String("a".to_string())),
        ]))];
        let objects = materializer.materialize(&rows).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["name"], "a");
    }

    #[test]
    fn test_nested_groups_children_under_parent() {
        let materializer = Materializer::Nested {
            relationship: "books".to_string(),
            parent_fields: vec!["id".to_string(), "name".to_string()],
            parent_key_fields: vec!["id".to_string()],
            child_fields: vec!["books.id".to_string(), "books.title".to_string()],
        };
        let rows = vec![
            boxed(row(&[
                ("id", DatabaseValue::Int64(1)),
                ("name", DatabaseValue::String("a".to_string())),
                ("books.id", DatabaseValue::Int64(10)),
                ("books.title", DatabaseValue::String("x".to_string())),
            ])),
            boxed(row(&[
                ("id", DatabaseValue::Int64(1)),
                ("name", DatabaseValue::String("a".to_string())),
                ("books.id", DatabaseValue::Int64(11)),
                ("books.title", DatabaseValue::String("y".to_string())),
            ])),
            boxed(row(&[
                ("id", DatabaseValue::Int64(2)),
                ("name", DatabaseValue::String("b".to_string())),
                ("books.id", DatabaseValue::Null),
                ("books.title", DatabaseValue::Null),
            ])),
        ];
        let objects = materializer.materialize(&rows).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["books"].as_array().unwrap().len(), 2);
        assert_eq!(objects[0]["books"][1]["title"], "y");
        assert_eq!(objects[1]["books"].as_array().unwrap().len(), 0);
    }
}
