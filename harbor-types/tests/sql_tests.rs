use harbor_types::{DbStep, ExecResult, QueryResult, RowMode, StepKind, StepResult};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn db_step_new_classifies() {
    let step = DbStep::new("SELECT COUNT(*) FROM t", vec![]);
    assert_eq!(step.kind, StepKind::Query);
    let step = DbStep::new("INSERT INTO t VALUES (?1)", vec![json!(1)]);
    assert_eq!(step.kind, StepKind::Exec);
}

#[test]
fn db_step_wire_shape() {
    let step = DbStep::new("SELECT a FROM t WHERE b = ?1", vec![json!("x")])
        .with_row_mode(RowMode::Array);
    let value = serde_json::to_value(&step).unwrap();
    assert_eq!(
        value,
        json!({
            "sql": "SELECT a FROM t WHERE b = ?1",
            "params": ["x"],
            "kind": "query",
            "rowMode": "array"
        })
    );
}

#[test]
fn db_step_defaults_when_fields_missing() {
    let step: DbStep = serde_json::from_value(json!({"sql": "DELETE FROM t", "kind": "exec"})).unwrap();
    assert!(step.params.is_empty());
    assert_eq!(step.row_mode, None);
}

#[test]
fn row_mode_defaults_to_object() {
    assert_eq!(RowMode::default(), RowMode::Object);
}

#[test]
fn step_result_is_tagged_by_kind() {
    let exec = StepResult::Exec(ExecResult { changes: 2, last_insert_id: 7 });
    assert_eq!(
        serde_json::to_value(&exec).unwrap(),
        json!({"kind": "exec", "changes": 2, "lastInsertId": 7})
    );

    let query = StepResult::Query(QueryResult {
        columns: vec!["n".into()],
        rows: vec![json!({"n": 3})],
    });
    let back: StepResult = serde_json::from_value(serde_json::to_value(&query).unwrap()).unwrap();
    assert_eq!(back.as_query().unwrap().rows, vec![json!({"n": 3})]);
    assert!(back.as_exec().is_none());
}
