use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mockall::predicate::*;

use super::*;
use crate::CommandOutput;
use crate::DiscoveryError;
use crate::Error;
use crate::MockRemoteExecutor;
use crate::Target;

fn endpoint() -> CatalogEndpoint {
    CatalogEndpoint::new("mdw", 5432, "postgres")
}

fn output(
    stdout: &str,
    stderr: &str,
    exit_code: i32,
) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

#[test]
fn endpoint_display() {
    assert_eq!(endpoint().to_string(), "mdw:5432/postgres");
}

#[test]
fn parse_rows_splits_fields_and_drops_blank_lines() {
    let rows = parse_rows("1|-1|p|p|mdw|5432|/data/master/gpseg-1|u\n\n2|0|p|p|sdw1|6000|/data/primary/gpseg0|u\n");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][4], "mdw");
    assert_eq!(rows[1].len(), 8);
    assert_eq!(rows[1][6], "/data/primary/gpseg0");
}

#[test]
fn truthiness_accepts_common_spellings() {
    for value in ["t", "true", "TRUE", "1", "yes", " y "] {
        assert!(is_truthy(value), "{value}");
    }
    for value in ["f", "false", "0", "no", ""] {
        assert!(!is_truthy(value), "{value}");
    }
}

#[test]
fn psql_command_uses_unaligned_tuples_only_mode() {
    let catalog = PsqlCatalog::new(Arc::new(MockRemoteExecutor::new()), "psql");
    let command = catalog.command(&endpoint(), "SELECT 1");

    assert_eq!(
        command.line,
        "psql -X -A -t -q -F '|' -h 'mdw' -p 5432 -d 'postgres' -c 'SELECT 1'"
    );
}

#[test]
fn psql_command_quotes_host_and_database() {
    let catalog = PsqlCatalog::new(Arc::new(MockRemoteExecutor::new()), "psql");
    let command = catalog.command(&CatalogEndpoint::new("mdw;true", 5432, "o'neil db"), "SELECT 1");

    assert_eq!(
        command.line,
        r"psql -X -A -t -q -F '|' -h 'mdw;true' -p 5432 -d 'o'\''neil db' -c 'SELECT 1'"
    );
}

#[tokio::test]
async fn query_runs_locally_and_parses_rows() {
    let mut executor = MockRemoteExecutor::new();
    executor
        .expect_execute()
        .with(always(), eq(Target::Local))
        .times(1)
        .returning(|_, _| Ok(output("t\n", "", 0)));
    let catalog = PsqlCatalog::new(Arc::new(executor), "psql");

    let rows = catalog.query(&endpoint(), "SELECT true").await.unwrap();

    assert_eq!(rows, vec![vec!["t".to_string()]]);
}

#[tokio::test]
async fn connection_failure_is_transient_unreachable() {
    let mut executor = MockRemoteExecutor::new();
    executor.expect_execute().returning(|_, _| {
        Ok(output(
            "",
            "psql: could not connect to server: Connection refused\n",
            2,
        ))
    });
    let catalog = PsqlCatalog::new(Arc::new(executor), "psql");

    let err = catalog.query(&endpoint(), "SELECT 1").await.unwrap_err();

    assert!(matches!(
        err,
        Error::Discovery(DiscoveryError::Unreachable { .. })
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn query_error_is_fatal() {
    let mut executor = MockRemoteExecutor::new();
    executor.expect_execute().returning(|_, _| {
        Ok(output("", "ERROR:  relation \"nope\" does not exist", 1))
    });
    let catalog = PsqlCatalog::new(Arc::new(executor), "psql");

    let err = catalog.query(&endpoint(), "SELECT * FROM nope").await.unwrap_err();

    match err {
        Error::Discovery(DiscoveryError::QueryFailed { exit_code, .. }) => assert_eq!(exit_code, 1),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn await_boolean_polls_until_expected_value() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut catalog = MockCatalogClient::new();
    catalog.expect_query().returning(move |_, _| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let value = if n < 2 { "f" } else { "t" };
        Ok(vec![vec![value.to_string()]])
    });
    let policy = PollPolicy::new(Duration::from_secs(10), Duration::from_secs(1));

    await_boolean(&catalog, &endpoint(), "SELECT pg_is_in_recovery()", true, &policy)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn await_boolean_times_out_with_last_value() {
    let mut catalog = MockCatalogClient::new();
    catalog
        .expect_query()
        .returning(|_, _| Ok(vec![vec!["f".to_string()]]));
    let policy = PollPolicy::new(Duration::from_secs(3), Duration::from_secs(1));

    let err = await_boolean(&catalog, &endpoint(), "SELECT false", true, &policy)
        .await
        .unwrap_err();

    match err {
        Error::Timeout(timeout) => {
            assert_eq!(timeout.last_observed.as_deref(), Some("returned f"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
