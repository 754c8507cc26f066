//! Tests for the mutation model

use chrono::NaiveDate;
use rivven_spanner::prelude::*;
use rivven_spanner::proto;

// ==================== Construction Tests ====================

#[test]
fn test_two_operation_kinds_rejected() {
    let err = WriteMutation::builder()
        .insert("table-name")
        .update("table-name")
        .build()
        .unwrap_err();

    assert!(matches!(err, Error::InvalidMutation { .. }));
    assert!(err.is_construction_error());
    assert!(!err.is_retriable());
}

#[test]
fn test_every_kind_builds() {
    let kinds = [
        MutationKind::Insert,
        MutationKind::Update,
        MutationKind::InsertOrUpdate,
        MutationKind::Replace,
    ];
    for kind in kinds {
        let builder = WriteMutation::builder();
        let builder = match kind {
            MutationKind::Insert => builder.insert("users"),
            MutationKind::Update => builder.update("users"),
            MutationKind::InsertOrUpdate => builder.insert_or_update("users"),
            _ => builder.replace("users"),
        };
        let m = builder
            .columns(["Key", "Value"])
            .values(vec![vec![1.into(), "a".into()], vec![2.into(), "b".into()]])
            .build()
            .unwrap();

        assert_eq!(m.kind(), kind);
        assert_eq!(m.table(), "users");
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cells(), 4);
    }
}

#[test]
fn test_data_kind_requires_columns() {
    let err = WriteMutation::builder()
        .replace("users")
        .values(vec![])
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("at least one column"));
}

#[test]
fn test_data_kind_rejects_key_set() {
    let err = WriteMutation::builder()
        .update("users")
        .columns(["Key"])
        .key_set(KeySet::all())
        .build()
        .unwrap_err();
    assert!(err.is_construction_error());
}

#[test]
fn test_empty_table_rejected() {
    assert!(WriteMutation::builder()
        .delete("")
        .key_set(KeySet::all())
        .build()
        .is_err());
}

// ==================== Size Accounting Tests ====================

#[test]
fn test_reference_insert_is_58_bytes() {
    let m = WriteMutation::insert(
        "roles",
        vec!["key".into(), "rolename".into()],
        vec![vec!["1234".into(), "mutations-inset-1234".into()]],
    );
    assert_eq!(m.byte_size(), 58);
}

#[test]
fn test_byte_size_grows_with_values() {
    let small = WriteMutation::insert(
        "users",
        vec!["Key".into(), "Value".into()],
        vec![vec![1.into(), "a".into()]],
    );
    let large = WriteMutation::insert(
        "users",
        vec!["Key".into(), "Value".into()],
        vec![vec![1.into(), "a".repeat(50).into()]],
    );
    assert_eq!(large.byte_size(), small.byte_size() + 49);
}

#[test]
fn test_typed_values_encode() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let m = WriteMutation::insert_or_update(
        "events",
        vec![
            "Id".into(),
            "Day".into(),
            "Payload".into(),
            "Tags".into(),
            "Deleted".into(),
        ],
        vec![vec![
            Value::Int64(7),
            Value::Date(date),
            Value::Json(serde_json::json!({"a": 1})),
            Value::Array(vec!["x".into(), "y".into()]),
            Value::Null,
        ]],
    );

    let encoded = m.to_proto();
    let Some(proto::Operation::InsertOrUpdate(write)) = encoded.operation else {
        panic!("expected insert_or_update");
    };
    assert_eq!(write.values.len(), 1);
    assert_eq!(write.values[0].values.len(), 5);
    assert_eq!(m.cells(), 5);
}

#[test]
fn test_delete_fixed_cost() {
    let by_keys = WriteMutation::delete(
        "roles",
        KeySet::keys(vec![vec![Value::Int64(1233)], vec![Value::Int64(1234)]]),
    );
    let by_range = WriteMutation::delete(
        "roles",
        KeySet::range(KeyRange::closed(
            vec![Value::Int64(1)],
            vec![Value::Int64(100)],
        )),
    );

    for m in [&by_keys, &by_range] {
        assert_eq!(m.kind(), MutationKind::Delete);
        assert_eq!(m.rows(), 0);
        assert_eq!(m.cells(), 0);
        assert!(m.byte_size() > 0);
    }
}

// ==================== Group Tests ====================

#[test]
fn test_group_totals_are_sums() {
    let a = WriteMutation::insert(
        "users",
        vec!["Key".into(), "Value".into(), "Age".into()],
        vec![vec![1.into(), "a".into(), 30.into()]],
    );
    let b = WriteMutation::update(
        "users",
        vec!["Key".into(), "Value".into()],
        vec![vec![2.into(), "b".into()], vec![3.into(), "c".into()]],
    );
    let group = MutationGroup::new(vec![a.clone(), b.clone()]).unwrap();

    assert_eq!(group.byte_size(), a.byte_size() + b.byte_size());
    assert_eq!(group.rows(), 3);
    assert_eq!(group.cells(), 7);
    assert_eq!(group.mutations(), &[a, b]);
    assert_eq!(group.to_proto().len(), 2);
}

#[test]
fn test_mutation_json() {
    let m = WriteMutation::delete("users", KeySet::all());
    let json = serde_json::to_value(&m).unwrap();
    assert_eq!(json["delete"]["table"], "users");
    assert_eq!(json["delete"]["key_set"]["all"], true);

    let decoded: WriteMutation = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, m);
}
