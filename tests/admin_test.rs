mod common;

use std::time::Duration;

use ddl_engine::ddl::stmt::{AlterTableSpec, ColumnDef, CreateTableStmt, IndexDef, IndexPart, TableName};
use ddl_engine::model::{ActionType, ColumnPosition, Datum, FieldType, JobState, SchemaState};
use ddl_engine::{DdlError, JobMonitor};

fn add_index(name: &str, column: &str, unique: bool) -> AlterTableSpec {
    let mut index = IndexDef::new(name, vec![IndexPart::column(column)]);
    index.unique = unique;
    AlterTableSpec::AddIndex {
        index,
        if_not_exists: false,
    }
}

async fn table_with_rows(se: &mut ddl_engine::Session, rows: i64, dup_every: i64) {
    se.create_table(&CreateTableStmt::new(
        "t",
        vec![
            ColumnDef::new("id", FieldType::bigint()).primary_key(),
            ColumnDef::new("k", FieldType::int()),
        ],
    ))
    .await
    .unwrap();
    let data = (1..=rows)
        .map(|i| vec![Datum::Int(i), Datum::Int(i % dup_every)])
        .collect();
    se.insert("t", &[], data).unwrap();
}

#[tokio::test]
async fn test_unique_backfill_violation_rolls_back() {
    let mut se = common::test_session().await;
    table_with_rows(&mut se, 50, 10).await;

    let err = se.alter_table("t", &[add_index("uk", "k", true)]).await.unwrap_err();
    assert_eq!(err.code(), 1062);
    assert!(matches!(err, DdlError::Job(_)));

    let table = se.domain().info_schema().table_by_name("test", "t").unwrap();
    assert!(table.meta.find_index("uk").is_none());

    let last = &se.show_jobs(1).unwrap()[0];
    assert_eq!(last.tp, ActionType::AddIndex);
    assert_eq!(last.state, JobState::RollbackDone);
    assert_eq!(last.error.as_ref().map(|e| e.code), Some(1062));

    // A non-unique index over the same rows succeeds and counts every row.
    se.alter_table("t", &[add_index("k_idx", "k", false)]).await.unwrap();
    let last = &se.show_jobs(1).unwrap()[0];
    assert_eq!(last.state, JobState::Done);
    assert_eq!(last.row_count, 50);
    let table = se.domain().info_schema().table_by_name("test", "t").unwrap();
    assert_eq!(table.meta.find_index("k_idx").unwrap().state, SchemaState::Public);
    se.domain().close().await;
}

#[tokio::test]
async fn test_add_column_fills_existing_rows() {
    let mut se = common::test_session().await;
    table_with_rows(&mut se, 3, 100).await;
    se.alter_table(
        "t",
        &[AlterTableSpec::AddColumns {
            columns: vec![ColumnDef::new("c", FieldType::int())
                .not_null()
                .default_value(ddl_engine::model::DefaultValue::Literal(Datum::Int(9)))],
            position: ColumnPosition::First,
            if_not_exists: false,
        }],
    )
    .await
    .unwrap();
    let rows = se.select_all("t").unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r[0] == Datum::Int(9) && r.len() == 3));

    se.alter_table(
        "t",
        &[AlterTableSpec::DropColumn {
            name: "c".to_string(),
            if_exists: false,
        }],
    )
    .await
    .unwrap();
    assert_eq!(se.select_all("t").unwrap()[0].len(), 2);
    assert_eq!(
        se.alter_table(
            "t",
            &[AlterTableSpec::DropColumn {
                name: "c".to_string(),
                if_exists: false,
            }],
        )
        .await
        .unwrap_err()
        .code(),
        1091
    );
    se.domain().close().await;
}

fn modify_not_null(column: &str) -> AlterTableSpec {
    AlterTableSpec::ModifyColumn {
        old_name: column.to_string(),
        column: ColumnDef::new(column, FieldType::int()).not_null(),
        position: ColumnPosition::None,
    }
}

#[tokio::test]
async fn test_modify_not_null_with_existing_null_rolls_back() {
    let mut se = common::test_session().await;
    table_with_rows(&mut se, 5, 100).await;
    se.insert("t", &["id"], vec![vec![Datum::Int(6)]]).unwrap();

    let err = se.alter_table("t", &[modify_not_null("k")]).await.unwrap_err();
    assert_eq!(err.code(), 1138);
    let last = &se.show_jobs(1).unwrap()[0];
    assert_eq!(last.tp, ActionType::ModifyColumn);
    assert_eq!(last.state, JobState::RollbackDone);

    let table = se.domain().info_schema().table_by_name("test", "t").unwrap();
    let k = table.meta.find_column("k").unwrap();
    assert!(!k.not_null);
    assert!(!k.prevent_null_insert);
    se.insert("t", &["id"], vec![vec![Datum::Int(7)]]).unwrap();
    assert_eq!(se.select_all("t").unwrap().len(), 7);
    se.domain().close().await;
}

#[tokio::test]
async fn test_modify_not_null_without_nulls_applies() {
    let mut se = common::test_session().await;
    table_with_rows(&mut se, 5, 100).await;

    se.alter_table("t", &[modify_not_null("k")]).await.unwrap();
    let table = se.domain().info_schema().table_by_name("test", "t").unwrap();
    assert!(table.meta.find_column("k").unwrap().not_null);
    let err = se.insert("t", &["id"], vec![vec![Datum::Int(6)]]).unwrap_err();
    assert_eq!(err.code(), 1364);
    let err = se
        .insert("t", &["id", "k"], vec![vec![Datum::Int(6), Datum::Null]])
        .unwrap_err();
    assert_eq!(err.code(), 1048);
    se.domain().close().await;
}

#[tokio::test]
async fn test_cancel_is_all_or_nothing() {
    let mut se = common::session_with(common::fast_config().reorg_batch_size(32)).await;
    table_with_rows(&mut se, 2_000, 1_000_000).await;
    let domain = se.domain().clone();

    let submit = async {
        domain
            .ddl()
            .alter_table(&domain.exec_context(), &TableName::qualified("test", "t"), &add_index("k_idx", "k", false))
            .await
    };
    let cancel = async {
        for _ in 0..2_000 {
            let queued = domain.ddl().show_jobs(0).unwrap();
            if let Some(job) = queued.iter().find(|j| j.tp == ActionType::AddIndex) {
                return Some(domain.ddl().cancel_job(job.id));
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        None
    };
    let (submitted, cancelled) = tokio::join!(submit, cancel);

    let last = domain.ddl().show_jobs(1).unwrap().remove(0);
    let index = domain
        .info_schema()
        .table_by_name("test", "t")
        .unwrap()
        .meta
        .find_index("k_idx")
        .cloned();
    match submitted {
        Ok(_) => {
            assert_eq!(last.state, JobState::Done);
            assert_eq!(index.unwrap().state, SchemaState::Public);
            if let Some(Err(e)) = cancelled {
                assert!([8212, 8213].contains(&e.code()));
            }
        }
        Err(e) => {
            assert_eq!(e.code(), 8214);
            assert_eq!(last.state, JobState::Cancelled);
            assert!(index.is_none());
        }
    }
    domain.close().await;
}

#[tokio::test]
async fn test_admin_errors_for_finished_and_unknown_jobs() {
    let mut se = common::test_session().await;
    se.create_table(&CreateTableStmt::new("t", vec![ColumnDef::new("a", FieldType::int())]))
        .await
        .unwrap();
    let job = se.show_jobs(1).unwrap().remove(0);
    assert_eq!(job.tp, ActionType::CreateTable);
    assert_eq!(job.state, JobState::Done);
    assert_eq!(se.job_status(job.id).unwrap().id, job.id);

    assert_eq!(se.cancel_job(job.id).unwrap_err().code(), 8213);
    assert_eq!(se.cancel_job(987_654).unwrap_err().code(), 8218);
    assert_eq!(se.resume_job(987_654).unwrap_err().code(), 8218);
    assert_eq!(se.job_status(987_654).unwrap_err().code(), 8218);

    let monitor = JobMonitor::new(Duration::from_millis(5), Duration::from_secs(1));
    let statuses = monitor.watch(se.domain().ddl(), &[job.id]).await.unwrap();
    assert_eq!(statuses[0].state, JobState::Done);
    assert!(statuses[0].start_time <= statuses[0].end_time);
    se.domain().close().await;
}

#[tokio::test]
async fn test_ddl_after_close_is_rejected() {
    let mut se = common::test_session().await;
    se.domain().close().await;
    let err = se
        .create_table(&CreateTableStmt::new("t", vec![ColumnDef::new("a", FieldType::int())]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 8201);
}
