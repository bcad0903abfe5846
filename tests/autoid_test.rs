mod common;

use ddl_engine::ddl::stmt::{AlterTableSpec, ColumnDef, CreateTableStmt, TableOptions};
use ddl_engine::model::{Datum, FieldType};

fn ints(rows: &[Vec<Datum>], col: usize) -> Vec<i64> {
    rows.iter().map(|r| r[col].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn test_auto_increment_starts_at_table_option() {
    let mut se = common::test_session().await;
    let mut stmt = CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("id", FieldType::int()).primary_key().auto_increment(),
            ColumnDef::new("v", FieldType::int()),
        ],
    );
    stmt.options = TableOptions {
        auto_increment: Some(999),
        ..Default::default()
    };
    se.create_table(&stmt).await.unwrap();

    for v in 0..3 {
        se.insert("t", &["v"], vec![vec![Datum::Int(v)]]).unwrap();
    }
    assert_eq!(ints(&se.select_all("t").unwrap(), 0), vec![999, 1000, 1001]);
    se.domain().close().await;
}

#[tokio::test]
async fn test_rebase_discards_cached_range() {
    let mut se = common::test_session().await;
    se.create_table(&CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("id", FieldType::bigint()).primary_key().auto_increment(),
            ColumnDef::new("v", FieldType::int()),
        ],
    ))
    .await
    .unwrap();
    se.insert("t", &["v"], vec![vec![Datum::Int(1)]]).unwrap();

    se.alter_table("t", &[AlterTableSpec::AutoIncrement { value: 100_000, force: false }])
        .await
        .unwrap();
    se.insert("t", &["v"], vec![vec![Datum::Int(2)]]).unwrap();

    // Moving backwards without FORCE keeps the larger base.
    se.alter_table("t", &[AlterTableSpec::AutoIncrement { value: 10, force: false }])
        .await
        .unwrap();
    se.insert("t", &["v"], vec![vec![Datum::Int(3)]]).unwrap();

    let ids = ints(&se.select_all("t").unwrap(), 0);
    assert_eq!(ids[0], 1);
    assert_eq!(ids[1], 100_000);
    assert!(ids[2] > 100_000);
    se.domain().close().await;
}

#[tokio::test]
async fn test_explicit_values_move_the_sequence_forward() {
    let mut se = common::test_session().await;
    se.create_table(&CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("id", FieldType::bigint()).primary_key().auto_increment(),
            ColumnDef::new("v", FieldType::int()),
        ],
    ))
    .await
    .unwrap();
    se.insert("t", &["id", "v"], vec![vec![Datum::Int(-7), Datum::Int(0)]]).unwrap();
    se.insert("t", &["v"], vec![vec![Datum::Int(1)]]).unwrap();
    se.insert("t", &["id", "v"], vec![vec![Datum::Int(100), Datum::Int(2)]]).unwrap();
    se.insert("t", &["v"], vec![vec![Datum::Int(3)]]).unwrap();

    assert_eq!(ints(&se.select_all("t").unwrap(), 0), vec![-7, 1, 100, 101]);
    se.domain().close().await;
}

#[tokio::test]
async fn test_auto_random_handles_are_dense_after_masking() {
    let mut se = common::test_session().await;
    se.create_table(&CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("a", FieldType::bigint()).primary_key().auto_random(15),
            ColumnDef::new("b", FieldType::int()),
        ],
    ))
    .await
    .unwrap();
    let rows: Vec<Vec<Datum>> = (0..100).map(|i| vec![Datum::Int(i)]).collect();
    se.insert("t", &["b"], rows).unwrap();

    let mask = (1i64 << (64 - 15 - 1)) - 1;
    let handles = ints(&se.select_all("t").unwrap(), 0);
    assert_eq!(handles.len(), 100);
    assert!(handles.iter().all(|h| *h > 0));
    let mut tails: Vec<i64> = handles.iter().map(|h| h & mask).collect();
    tails.sort_unstable();
    assert_eq!(tails, (1..=100).collect::<Vec<_>>());
    se.domain().close().await;
}

#[tokio::test]
async fn test_auto_random_explicit_insert() {
    let mut se = common::test_session().await;
    se.create_table(&CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("a", FieldType::bigint()).primary_key().auto_random(15),
            ColumnDef::new("b", FieldType::int()),
        ],
    ))
    .await
    .unwrap();
    let err = se
        .insert("t", &["a", "b"], vec![vec![Datum::Int(5), Datum::Int(0)]])
        .unwrap_err();
    assert_eq!(err.code(), 8216);

    se.set_var("allow_auto_random_explicit_insert", "1").unwrap();
    // Negative explicit values leave the allocator alone.
    se.insert("t", &["a", "b"], vec![vec![Datum::Int(-5), Datum::Int(0)]]).unwrap();
    se.insert("t", &["b"], vec![vec![Datum::Int(1)]]).unwrap();
    se.insert("t", &["a", "b"], vec![vec![Datum::Int(1000), Datum::Int(2)]]).unwrap();
    se.insert("t", &["b"], vec![vec![Datum::Int(3)]]).unwrap();

    let mask = (1i64 << 48) - 1;
    let rows = se.select_all("t").unwrap();
    let by_b = |b: i64| {
        rows.iter()
            .find(|r| r[1] == Datum::Int(b))
            .and_then(|r| r[0].as_i64())
            .unwrap()
    };
    assert_eq!(by_b(0), -5);
    assert_eq!(by_b(1) & mask, 1);
    assert_eq!(by_b(2), 1000);
    assert_eq!(by_b(3) & mask, 1001);
    se.domain().close().await;
}

#[tokio::test]
async fn test_unsigned_auto_random_uses_the_sign_bit() {
    let mut se = common::test_session().await;
    se.create_table(&CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("a", FieldType::bigint().unsigned()).primary_key().auto_random(5),
            ColumnDef::new("b", FieldType::int()),
        ],
    ))
    .await
    .unwrap();
    se.insert("t", &["b"], vec![vec![Datum::Int(0)], vec![Datum::Int(1)]]).unwrap();

    se.set_var("allow_auto_random_explicit_insert", "1").unwrap();
    let explicit = (1u64 << 63) | 7;
    se.insert("t", &["a", "b"], vec![vec![Datum::Uint(explicit), Datum::Int(2)]]).unwrap();
    se.insert("t", &["b"], vec![vec![Datum::Int(3)]]).unwrap();

    let mask = (1u64 << 59) - 1;
    let rows = se.select_all("t").unwrap();
    assert_eq!(rows.len(), 4);
    let by_b = |b: i64| match rows.iter().find(|r| r[1] == Datum::Int(b)).map(|r| &r[0]) {
        Some(Datum::Uint(v)) => *v,
        other => panic!("unexpected handle {:?}", other),
    };
    assert_eq!(by_b(0) & mask, 1);
    assert_eq!(by_b(1) & mask, 2);
    assert_eq!(by_b(2), explicit);
    assert_eq!(by_b(3) & mask, 8);
    se.domain().close().await;
}

#[tokio::test]
async fn test_unsigned_auto_increment_keeps_large_explicit_value() {
    let mut se = common::test_session().await;
    se.create_table(&CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("id", FieldType::bigint().unsigned()).primary_key().auto_increment(),
            ColumnDef::new("v", FieldType::int()),
        ],
    ))
    .await
    .unwrap();
    let big = u64::MAX - 1;
    se.insert("t", &["id", "v"], vec![vec![Datum::Uint(big), Datum::Int(0)]]).unwrap();
    se.insert("t", &["v"], vec![vec![Datum::Int(1)]]).unwrap();

    let rows = se.select_all("t").unwrap();
    assert!(rows.iter().any(|r| r[0] == Datum::Uint(big) && r[1] == Datum::Int(0)));
    assert!(rows.iter().any(|r| r[0] == Datum::Uint(1) && r[1] == Datum::Int(1)));
    se.domain().close().await;
}

#[tokio::test]
async fn test_auto_random_exhausted() {
    let mut se = common::test_session().await;
    se.create_table(&CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("a", FieldType::bigint()).primary_key().auto_random(15),
            ColumnDef::new("b", FieldType::int()),
        ],
    ))
    .await
    .unwrap();
    let max = (1i64 << 48) - 1;

    let err = se
        .alter_table("t", &[AlterTableSpec::AutoRandomBase { value: max + 2, force: false }])
        .await
        .unwrap_err();
    assert_eq!(err.code(), 8216);

    se.alter_table("t", &[AlterTableSpec::AutoRandomBase { value: max, force: false }])
        .await
        .unwrap();
    se.insert("t", &["b"], vec![vec![Datum::Int(1)]]).unwrap();
    let handle = ints(&se.select_all("t").unwrap(), 0)[0];
    assert_eq!(handle & max, max);

    let err = se.insert("t", &["b"], vec![vec![Datum::Int(2)]]).unwrap_err();
    assert_eq!(err.code(), 8228);
    // The failed statement leaves the session usable.
    assert_eq!(se.select_all("t").unwrap().len(), 1);
    se.domain().close().await;
}

#[tokio::test]
async fn test_auto_random_rejects_non_handle_column() {
    let mut se = common::test_session().await;
    let err = se
        .create_table(&CreateTableStmt::new(
            "t",
            vec![
                ColumnDef::new("a", FieldType::bigint()).primary_key(),
                ColumnDef::new("b", FieldType::bigint()).auto_random(5),
            ],
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 8216);

    let mut stmt = CreateTableStmt::new("t", vec![ColumnDef::new("a", FieldType::int()).primary_key()]);
    stmt.options.auto_random_base = Some(100);
    assert_eq!(se.create_table(&stmt).await.unwrap_err().code(), 8216);
    se.domain().close().await;
}
