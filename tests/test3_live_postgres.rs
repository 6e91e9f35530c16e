#![cfg(feature = "test-utils-postgres")]

use pg_access_bench::model::SELECT_SQL;
use pg_access_bench::test_utils::{setup_postgres_embedded, stop_postgres_embedded};
use pg_access_bench::model::INSERT_SQL;
use pg_access_bench::{
    Batch, BenchSettings, Benchmark, ConnectOptions, Database, DbUser, Driver, RowValue,
    Transaction, close_db, connect_to_db, init_db, run_benchmarks,
};

const COUNT_SQL: &str = "SELECT count(*) FROM test";

async fn row_count(db: &dyn Database) -> Result<Option<i64>, Box<dyn std::error::Error>> {
    let row = db.query_one(COUNT_SQL, &[]).await?;
    Ok(row.get_by_index(0).and_then(RowValue::as_int))
}

#[tokio::test]
async fn test3_full_cycle_for_both_drivers() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("bench_db").await?;

    for driver in [Driver::Pool, Driver::Client] {
        let options = ConnectOptions {
            conn_str: pg.database_url.clone(),
            driver,
            pool_size: 2,
        };
        let db = connect_to_db(&options).await?;
        init_db(db.as_ref()).await?;

        let settings = BenchSettings {
            rows: 25,
            batch_size: 10,
        };
        let report = run_benchmarks(db.as_ref(), &settings, &[]).await?;
        assert_eq!(report.timings.len(), Benchmark::ALL.len());

        // three write benchmarks, 25 rows each; the probe row was rolled back
        let rows = db.query(SELECT_SQL, &[RowValue::Int(1000)]).await?;
        assert_eq!(rows.len(), 75, "{driver:?}");
        assert_eq!(DbUser::from_row(&rows[0])?, DbUser::fixture());

        close_db(db.as_ref()).await?;
    }

    stop_postgres_embedded(pg).await;
    Ok(())
}

#[tokio::test]
async fn test3_transaction_rollback_discards_rows() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("bench_tx_db").await?;
    let options = ConnectOptions {
        conn_str: pg.database_url.clone(),
        driver: Driver::Pool,
        pool_size: 1,
    };
    let db = connect_to_db(&options).await?;
    init_db(db.as_ref()).await?;

    let tx = db.begin().await?;
    tx.execute(
        "INSERT INTO test (id, name, age, meta) VALUES ($1, $2, $3, $4)",
        &DbUser::fixture().params(),
    )
    .await?;
    tx.rollback().await?;

    // dropped without commit or rollback: the connection is not reused
    {
        let tx = db.begin().await?;
        tx.execute(
            "INSERT INTO test (id, name, age, meta) VALUES ($1, $2, $3, $4)",
            &DbUser::fixture().params(),
        )
        .await?;
    }

    let rows = db.query(SELECT_SQL, &[RowValue::Int(10)]).await?;
    assert!(rows.is_empty());

    close_db(db.as_ref()).await?;
    stop_postgres_embedded(pg).await;
    Ok(())
}

#[tokio::test]
async fn test3_failed_batch_is_rolled_back() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("bench_batch_db").await?;

    for driver in [Driver::Pool, Driver::Client] {
        let options = ConnectOptions {
            conn_str: pg.database_url.clone(),
            driver,
            pool_size: 1,
        };
        let db = connect_to_db(&options).await?;
        init_db(db.as_ref()).await?;

        let mut batch = Batch::new();
        batch.queue(INSERT_SQL, DbUser::fixture().params());
        batch.queue(INSERT_SQL, DbUser::fixture().params());
        batch.queue(
            "INSERT INTO test (id, name, age, meta) VALUES ($1, $2, 100 / $3, $4)",
            vec![
                RowValue::Int(3),
                "Jane".into(),
                RowValue::Int(0),
                RowValue::Json(serde_json::json!({})),
            ],
        );
        let err = db.send_batch(&batch).await.unwrap_err();
        assert!(err.to_string().contains("division by zero"), "{driver:?}: {err}");
        assert_eq!(row_count(db.as_ref()).await?, Some(0), "{driver:?}");

        // the connection is usable again after the rollback
        assert_eq!(db.execute(INSERT_SQL, &DbUser::fixture().params()).await?, 1);
        assert_eq!(row_count(db.as_ref()).await?, Some(1), "{driver:?}");

        close_db(db.as_ref()).await?;
    }

    stop_postgres_embedded(pg).await;
    Ok(())
}

#[tokio::test]
async fn test3_dropped_direct_transaction_keeps_later_writes()
-> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("bench_direct_tx_db").await?;
    let options = ConnectOptions {
        conn_str: pg.database_url.clone(),
        driver: Driver::Client,
        pool_size: 1,
    };

    let db = connect_to_db(&options).await?;
    init_db(db.as_ref()).await?;
    {
        let tx = db.begin().await?;
        tx.execute(INSERT_SQL, &DbUser::fixture().params()).await?;
    }
    db.execute(INSERT_SQL, &DbUser::fixture().params()).await?;
    db.close().await;

    let fresh = connect_to_db(&options).await?;
    assert_eq!(row_count(fresh.as_ref()).await?, Some(1));
    close_db(fresh.as_ref()).await?;

    stop_postgres_embedded(pg).await;
    Ok(())
}

#[tokio::test]
async fn test3_server_message_reaches_joined_error() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("bench_error_db").await?;
    let options = ConnectOptions {
        conn_str: pg.database_url.clone(),
        driver: Driver::Pool,
        pool_size: 1,
    };
    let db = connect_to_db(&options).await?;

    // no init_db: every benchmark hits the missing table
    let err = run_benchmarks(db.as_ref(), &BenchSettings::default(), &[Benchmark::InsertSimple])
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("Insert row by row"), "{text}");
    assert!(text.contains("relation \"test\" does not exist"), "{text}");

    db.close().await;
    stop_postgres_embedded(pg).await;
    Ok(())
}
