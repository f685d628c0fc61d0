use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlscore_core::{ExecutionErrorKind, Value};
use sqlscore_postgres::{open_handle, PostgresOptions};

fn database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok()
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
}

#[test]
fn executes_statements_and_classifies_errors() -> Result<()> {
    let Some(db_url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL for integration tests");
        return Ok(());
    };
    let runtime = runtime()?;
    let options = PostgresOptions {
        statement_timeout: Duration::from_millis(500),
        ..PostgresOptions::default()
    };
    let handle = open_handle(&db_url, options, runtime.handle().clone())
        .context("connecting to Postgres")?;

    let rows = handle
        .execute(
            "SELECT 1::int4 AS a, 2.50::numeric AS b, 'x'::text AS c, NULL::int8 AS d, \
             DATE '2020-01-31' AS e, true AS f",
        )
        .context("running typed select")?;
    assert_eq!(
        rows,
        vec![vec![
            Value::Int(1),
            Value::Numeric("2.50".to_string()),
            Value::Text("x".to_string()),
            Value::Null,
            Value::Date("2020-01-31".to_string()),
            Value::Bool(true),
        ]]
    );

    let err = handle
        .execute("SELECT missing_column FROM (SELECT 1 AS a) t")
        .unwrap_err();
    assert_eq!(err.kind, ExecutionErrorKind::UndefinedColumn);

    let err = handle.execute("SELEC 1").unwrap_err();
    assert_eq!(err.kind, ExecutionErrorKind::Syntax);

    let err = handle.execute("SELECT pg_sleep(2)").unwrap_err();
    assert_eq!(err.kind, ExecutionErrorKind::Timeout);

    Ok(())
}

#[test]
fn decodes_intervals_arrays_and_timetz_by_value() -> Result<()> {
    let Some(db_url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL for integration tests");
        return Ok(());
    };
    let runtime = runtime()?;
    let handle = open_handle(&db_url, PostgresOptions::default(), runtime.handle().clone())
        .context("connecting to Postgres")?;

    let rows = handle
        .execute(
            "SELECT interval '-1 day' AS a, interval '-2 days' AS b, \
             ARRAY[1.5, NULL]::float8[] AS c, ARRAY[2.5]::float8[] AS d, \
             ARRAY['x', 'y']::text[] AS e, TIME WITH TIME ZONE '10:30:00+02' AS f, \
             point '(1,2)' AS g",
        )
        .context("running composite select")?;
    let row = &rows[0];

    assert_eq!(
        row[0],
        Value::Interval {
            months: 0,
            days: -1,
            microseconds: 0,
        }
    );
    assert_ne!(row[0], row[1]);
    assert_eq!(row[2], Value::Array(vec![Value::Float(1.5), Value::Null]));
    assert_eq!(row[3], Value::Array(vec![Value::Float(2.5)]));
    assert_eq!(
        row[4],
        Value::Array(vec![Value::Text("x".to_string()), Value::Text("y".to_string())])
    );
    assert_eq!(row[5], Value::Time("10:30:00+02:00".to_string()));
    // No typed decoder for points: the wire bytes keep distinct values apart.
    assert_eq!(
        row[6],
        Value::Other("\\x3ff00000000000004000000000000000".to_string())
    );

    Ok(())
}

#[test]
fn statements_cannot_write() -> Result<()> {
    let Some(db_url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL for integration tests");
        return Ok(());
    };
    let runtime = runtime()?;
    let handle = open_handle(&db_url, PostgresOptions::default(), runtime.handle().clone())
        .context("connecting to Postgres")?;

    let err = handle
        .execute("CREATE TABLE sqlscore_should_not_exist (id int)")
        .unwrap_err();
    assert_eq!(err.sqlstate.as_deref(), Some("25006"));
    Ok(())
}
