//! Builder compilation and execution through a session

mod common;

use serde_json::{json, Value};

use common::{config, session, session_with, ScriptedLink};
use pged::query::{Comparer, Condition};
use pged::{Join, OnConflict, Output, Pagination};
use pged_core::Error;

#[tokio::test]
async fn filter_compiles_to_parameterized_where() {
    let link = ScriptedLink::new();
    let session = session(&link);

    let compiled = session
        .from("users")
        .filter(json!({"name": "Alice", "age": {"$gte": 30}}))
        .to_sql()
        .await
        .unwrap();

    assert_eq!(
        compiled.sql,
        r#"SELECT * FROM users WHERE ("name" = $1 AND "age" >= $2)"#
    );
    assert_eq!(compiled.params, vec![json!("Alice"), json!(30)]);
    assert!(link.statements().is_empty());
}

#[tokio::test]
async fn join_from_json_compiles_left_join() {
    let link = ScriptedLink::new();
    let session = session(&link);

    let compiled = session
        .from("users")
        .join_value(&json!({"table": "orders", "local": "id", "foreign": "userId", "required": "local"}))
        .to_sql()
        .await
        .unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT * FROM users LEFT JOIN orders ON users.id = orders.user_id"
    );
}

#[tokio::test]
async fn insert_runs_inside_a_transaction() {
    let link = ScriptedLink::new();
    link.respond(
        "INSERT INTO users",
        json!([{"id": 1, "first_name": "Bob"}]),
    );
    let session = session(&link);

    let row = session
        .from("users")
        .insert(json!({"firstName": "Bob"}))
        .execute()
        .await
        .unwrap()
        .into_row()
        .unwrap();

    assert_eq!(row, json!({"id": 1, "firstName": "Bob"}).as_object().cloned().unwrap());
    assert_eq!(
        link.statements(),
        [
            "BEGIN",
            "INSERT INTO users (first_name) VALUES ($1) RETURNING *",
            "COMMIT"
        ]
    );
    assert_eq!(link.params(1), vec![json!("Bob")]);
}

#[tokio::test]
async fn failed_update_rolls_back() {
    let link = ScriptedLink::new();
    link.fail_on("UPDATE");
    let session = session(&link);

    let err = session
        .from("users")
        .filter(json!({"id": 1}))
        .update(json!({"name": "x"}))
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Link { .. }));
    assert_eq!(link.statements().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn delete_returns_no_rows() {
    let link = ScriptedLink::new();
    let session = session(&link);

    let output = session
        .from("users")
        .filter(json!({"id": [1, 2]}))
        .delete()
        .execute()
        .await
        .unwrap();

    assert_eq!(output, Output::Rows(vec![]));
    assert_eq!(
        link.statements(),
        [
            "BEGIN",
            r#"DELETE FROM users WHERE "id" = ANY(ARRAY[$1, $2])"#,
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn upsert_do_nothing() {
    let link = ScriptedLink::new();
    let session = session(&link);

    let compiled = session
        .from("users")
        .insert(json!({"email": "a@b.c"}))
        .on_conflict(["email"], OnConflict::DoNothing)
        .to_sql()
        .await
        .unwrap();

    assert_eq!(
        compiled.sql,
        "INSERT INTO users (email) VALUES ($1) ON CONFLICT (email) DO NOTHING RETURNING *"
    );
}

#[tokio::test]
async fn empty_page_falls_back_to_count() {
    let link = ScriptedLink::new();
    link.respond("COUNT(*)::bigint", json!([{"count": 0}]));
    let session = session(&link);

    let page = session
        .from("users")
        .filter(json!({"active": true}))
        .sorted(["id"])
        .paginated(Pagination::new(20, 10))
        .execute()
        .await
        .unwrap();

    assert_eq!(page, Output::Page(pged::Paginated { total: 0, items: vec![] }));
    assert_eq!(
        serde_json::to_value(&page).unwrap(),
        json!({"total": 0, "items": []})
    );
    assert_eq!(
        link.statements(),
        [
            r#"SELECT *, COUNT(*) OVER() AS total FROM users WHERE "active" = $1 ORDER BY "id" LIMIT 10 OFFSET 20"#,
            r#"SELECT COUNT(*)::bigint AS count FROM users WHERE "active" = $1"#,
        ]
    );
}

#[tokio::test]
async fn page_past_the_end_reports_true_total() {
    let link = ScriptedLink::new();
    link.respond("COUNT(*)::bigint", json!([{"count": 3}]));
    let session = session(&link);

    let page = session
        .from("users")
        .paginated(Pagination::new(100, 10))
        .execute()
        .await
        .unwrap()
        .into_page();

    assert_eq!(page.total, 3);
    assert!(page.items.is_empty());
    assert!(!page.has_more(&Pagination::new(100, 10)));
}

#[tokio::test]
async fn page_uses_window_total() {
    let link = ScriptedLink::new();
    link.respond(
        "OVER()",
        json!([{"id": 1, "total": 5}, {"id": 2, "total": 5}]),
    );
    let session = session(&link);

    let window = Pagination::from_page(1, 2);
    let page = session
        .from("users")
        .paginated(window)
        .execute()
        .await
        .unwrap()
        .into_page();

    assert_eq!(page.total, 5);
    assert!(page.has_more(&window));
    assert_eq!(page.items.len(), 2);
    assert!(page.items.iter().all(|item| !item.contains_key("total")));
    assert_eq!(link.statements().len(), 1);
}

#[tokio::test]
async fn count_and_sum_shortcuts() {
    let link = ScriptedLink::new();
    link.respond("COUNT(", json!([{"count": 4}]));
    link.respond("SUM(", json!([{"sum": 12.5}]));
    let session = session(&link);

    let count = session
        .from("users")
        .filter(json!({"active": true}))
        .sorted(["-id"])
        .count(None)
        .await
        .unwrap();
    assert_eq!(count, 4);

    let with_key = session
        .from("users")
        .count(Some("email"))
        .await
        .unwrap();
    assert_eq!(with_key, 4);

    let sum = session.from("orders").sum("totalPrice").await.unwrap();
    assert_eq!(sum, Some(12.5));

    assert_eq!(
        link.statements(),
        [
            r#"SELECT COUNT(*)::bigint AS count FROM users WHERE "active" = $1"#,
            "SELECT COUNT(users.email)::bigint AS count FROM users",
            "SELECT SUM(orders.total_price)::float8 AS sum FROM orders",
        ]
    );
}

#[tokio::test]
async fn sum_of_nothing_is_none() {
    let link = ScriptedLink::new();
    link.respond("SUM(", json!([{"sum": null}]));
    let session = session(&link);

    assert_eq!(session.from("orders").sum("total").await.unwrap(), None);
}

#[tokio::test]
async fn first_field_returns_one_value() {
    let link = ScriptedLink::new();
    link.respond("SELECT email", json!([{"email": "a@b.c"}]));
    let session = session(&link);

    let email = session
        .from("users")
        .filter(json!({"id": 3}))
        .first_field("email")
        .execute()
        .await
        .unwrap()
        .into_value();

    assert_eq!(email, Some(json!("a@b.c")));
    assert_eq!(
        link.statements(),
        [r#"SELECT email FROM users WHERE "id" = $1 LIMIT 1"#]
    );
}

#[tokio::test]
async fn input_errors_surface_at_execution() {
    let link = ScriptedLink::new();
    let session = session(&link);

    let err = session
        .from("users")
        .filter(json!({"$bogus": 1}))
        .sorted(["id"])
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownModifier { .. }));

    let err = session
        .from("users")
        .insert(json!(["not", "an", "object"]))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidValues { .. }));

    let err = session
        .from("users")
        .join(Join::new(""))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidJoin { .. }));

    let err = session
        .from("users")
        .filter(json!({"age": {"$lt": null}}))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NullComparison { .. }));
    assert!(err.is_validation());

    assert!(link.statements().is_empty());
    assert_eq!(link.connects(), 0);
}

#[tokio::test]
async fn introspects_each_table_once() {
    let link = ScriptedLink::new();
    link.respond(
        "information_schema.columns",
        json!([
            {"column_name": "id", "udt_name": "int4"},
            {"column_name": "meta", "udt_name": "jsonb"}
        ]),
    );
    let mut config = config();
    config.schema.introspect = true;
    let first = session_with(&link, config.clone());
    let second = pged::Session::with_database(first.database().clone(), config);

    let compiled = first
        .from("posts")
        .insert(json!({"meta": {"draft": true}}))
        .to_sql()
        .await
        .unwrap();
    assert_eq!(
        compiled.sql,
        "INSERT INTO posts (meta) VALUES ($1::jsonb) RETURNING *"
    );
    assert_eq!(compiled.params, vec![Value::from(r#"{"draft":true}"#)]);

    second
        .from("posts")
        .filter(json!({"meta": {"$contains": {"draft": true}}}))
        .to_sql()
        .await
        .unwrap();

    let introspections = link
        .statements()
        .iter()
        .filter(|sql| sql.contains("information_schema"))
        .count();
    assert_eq!(introspections, 1);
    assert_eq!(link.params(0), vec![Value::Null, json!("posts")]);

    assert!(first.database().schema().forget("posts").await);
    assert!(!first.database().schema().forget("posts").await);
    second.from("posts").to_sql().await.unwrap();

    let introspections = link
        .statements()
        .iter()
        .filter(|sql| sql.contains("information_schema"))
        .count();
    assert_eq!(introspections, 2);
}

#[tokio::test]
async fn qualified_tables_introspect_their_schema() {
    let link = ScriptedLink::new();
    link.respond(
        "information_schema.columns",
        json!([{"column_name": "payload", "udt_name": "jsonb"}]),
    );
    let mut config = config();
    config.schema.introspect = true;
    let session = session_with(&link, config);

    let compiled = session
        .from("audit.events")
        .insert(json!({"payload": {"kind": "login"}}))
        .to_sql()
        .await
        .unwrap();

    assert_eq!(link.params(0), vec![json!("audit"), json!("events")]);
    assert_eq!(
        compiled.sql,
        "INSERT INTO audit.events (payload) VALUES ($1::jsonb) RETURNING *"
    );
}

#[tokio::test]
async fn filter_by_takes_a_built_condition() {
    let link = ScriptedLink::new();
    let session = session(&link);

    let compiled = session
        .from("users")
        .filter(json!({"active": true}))
        .filter_by(Condition::or(vec![
            Condition::leaf("role", Comparer::Eq, "admin"),
            Condition::leaf("age", Comparer::Gte, 18),
        ]))
        .to_sql()
        .await
        .unwrap();

    assert_eq!(
        compiled.sql,
        r#"SELECT * FROM users WHERE ("active" = $1 AND ("role" = $2 OR "age" >= $3))"#
    );
    assert_eq!(compiled.params, vec![json!(true), json!("admin"), json!(18)]);
}
