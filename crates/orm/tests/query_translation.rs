//! Query translation: scope checking, parameter lifting, implicit joins,
//! aggregation, and shape validation.

use loam_orm::query::{Aggregate, Materializer, Predicate, Query, QueryTranslator};
use loam_orm::schema::{ColumnType, EntityDef, ModelRegistry};
use loam_orm::value::DatabaseValue;
use loam_orm::OrmError;

fn library_registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            EntityDef::new("authors")
                .key("id", ColumnType::Uuid)
                .column("name", ColumnType::Text)
                .nullable_column("email", ColumnType::Text)
                .has_many("books", "books", &["author_id"]),
        )
        .unwrap();
    registry
        .register(
            EntityDef::new("books")
                .key("id", ColumnType::Uuid)
                .column("title", ColumnType::Text)
                .column("pages", ColumnType::Integer)
                .column("author_id", ColumnType::Uuid)
                .belongs_to("author", "authors", &["author_id"]),
        )
        .unwrap();
    registry.seal().unwrap();
    registry
}

#[test]
fn literals_never_reach_statement_text() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    // Strings chosen to break out of any naive interpolation
    let hostile = [
        "'; DROP TABLE authors; --",
        "Robert\"); DROP TABLE books;--",
        "plain' OR '1'='1",
        "semi;colon",
        "back\\slash'quote",
    ];

    for payload in hostile {
        let query = Query::from("authors").filter(
            Predicate::eq("name", payload).or(Predicate::like("email", payload)),
        );
        let translated = translator.translate(&query).unwrap();
        assert!(
            !translated.sql.contains(payload),
            "literal leaked into SQL: {}",
            translated.sql
        );
        assert!(translated
            .params
            .iter()
            .any(|p| *p == DatabaseValue::String(payload.to_string())));
    }
}

#[test]
fn filter_and_pagination_lift_parameters_in_order() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("books")
        .filter(Predicate::gt("pages", 100i64).and(Predicate::like("title", "rust%")))
        .order_by("title")
        .skip(20)
        .take(10);
    let translated = translator.translate(&query).unwrap();

    assert_eq!(
        translated.sql,
        "SELECT t0.id AS \"id\", t0.title AS \"title\", t0.pages AS \"pages\", \
         t0.author_id AS \"author_id\" FROM books t0 \
         WHERE (t0.pages > $1 AND t0.title LIKE $2) \
         ORDER BY t0.title ASC LIMIT $3 OFFSET $4"
    );
    assert_eq!(
        translated.params,
        vec![
            DatabaseValue::Int64(100),
            DatabaseValue::String("rust%".to_string()),
            DatabaseValue::Int64(10),
            DatabaseValue::Int64(20),
        ]
    );
}

#[test]
fn unbound_field_is_rejected_with_scope() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("authors").filter(Predicate::eq("title", "nope"));
    let err = translator.translate(&query).unwrap_err();
    match err {
        OrmError::UnboundField { field, scope } => {
            assert_eq!(field, "title");
            assert!(scope.contains("authors"));
        }
        other => panic!("expected UnboundField, got {:?}", other),
    }
}

#[test]
fn projection_narrows_the_scope() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("authors")
        .project(&["id", "name"])
        .filter(Predicate::eq("email", "x"));
    let err = translator.translate(&query).unwrap_err();
    assert!(matches!(err, OrmError::UnboundField { .. }));

    let query = Query::from("authors").project(&["id", "name"]);
    let translated = translator.translate(&query).unwrap();
    assert_eq!(
        translated.sql,
        "SELECT t0.id AS \"id\", t0.name AS \"name\" FROM authors t0"
    );
}

#[test]
fn belongs_to_join_flattens_into_the_parent_row() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("books")
        .join("author")
        .filter(Predicate::eq("author.name", "someone"));
    let translated = translator.translate(&query).unwrap();

    assert!(translated
        .sql
        .contains("INNER JOIN authors t1 ON t0.author_id = t1.id"));
    assert!(translated.sql.contains("t1.name AS \"author.name\""));
    assert!(translated.sql.contains("WHERE t1.name = $1"));
    assert!(matches!(
        translated.materializer,
        Materializer::Rows { .. }
    ));
}

#[test]
fn has_many_join_nests_children_under_the_parent() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("authors").join("books");
    let translated = translator.translate(&query).unwrap();

    assert!(translated
        .sql
        .contains("LEFT JOIN books t1 ON t1.author_id = t0.id"));
    match translated.materializer {
        Materializer::Nested {
            relationship,
            parent_key_fields,
            child_fields,
            ..
        } => {
            assert_eq!(relationship, "books");
            assert_eq!(parent_key_fields, vec!["id".to_string()]);
            assert!(child_fields.contains(&"books.title".to_string()));
        }
        other => panic!("expected Nested materializer, got {:?}", other),
    }
}

#[test]
fn group_by_computes_aggregates_in_the_statement() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("books")
        .group_by(
            &["author_id"],
            vec![Aggregate::count("n"), Aggregate::sum("pages", "total_pages")],
        )
        .filter(Predicate::gt("n", 2i64))
        .order_by_desc("total_pages");
    let translated = translator.translate(&query).unwrap();

    assert_eq!(
        translated.sql,
        "SELECT t0.author_id AS \"author_id\", COUNT(*) AS \"n\", \
         SUM(t0.pages) AS \"total_pages\" FROM books t0 \
         GROUP BY t0.author_id HAVING COUNT(*) > $1 \
         ORDER BY SUM(t0.pages) DESC"
    );
    assert_eq!(translated.params, vec![DatabaseValue::Int64(2)]);
}

#[test]
fn aggregate_after_take_is_an_invalid_shape() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("books")
        .take(5)
        .group_by(&["author_id"], vec![Aggregate::count("n")]);
    let err = translator.translate(&query).unwrap_err();
    assert!(matches!(err, OrmError::InvalidQueryShape { .. }));
}

#[test]
fn filter_after_take_is_an_invalid_shape() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("books")
        .take(5)
        .filter(Predicate::eq("title", "late"));
    let err = translator.translate(&query).unwrap_err();
    assert!(matches!(err, OrmError::InvalidQueryShape { .. }));
}

#[test]
fn unknown_relationship_is_an_invalid_shape() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("authors").join("publisher");
    let err = translator.translate(&query).unwrap_err();
    assert!(matches!(err, OrmError::InvalidQueryShape { .. }));
}

#[test]
fn no_order_by_means_no_order_clause() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let translated = translator.translate(&Query::from("authors")).unwrap();
    assert!(!translated.sql.contains("ORDER BY"));
}

#[test]
fn empty_in_list_matches_nothing() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("authors").filter(Predicate::is_in("name", Vec::new()));
    let translated = translator.translate(&query).unwrap();
    assert!(translated.sql.contains("WHERE FALSE"));
    assert!(translated.params.is_empty());
}

#[test]
fn null_checks_take_no_parameters() {
    let registry = library_registry();
    let translator = QueryTranslator::new(&registry);

    let query = Query::from("authors").filter(Predicate::is_null("email"));
    let translated = translator.translate(&query).unwrap();
    assert!(translated.sql.contains("t0.email IS NULL"));
    assert!(translated.params.is_empty());
}
