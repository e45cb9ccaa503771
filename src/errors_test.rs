use std::time::Duration;

use super::*;

#[test]
fn test_execution_failed_is_transient() {
    let err: Error = ExecutionFailed {
        command: "hostname".to_string(),
        target: Target::Remote("sdw1".to_string()),
        cause: "ssh: connect to host sdw1 port 22: Connection refused".to_string(),
    }
    .into();
    assert!(err.is_transient());
    assert!(err.to_string().contains("sdw1"));
}

#[test]
fn test_only_unreachable_discovery_is_transient() {
    let unreachable: Error = DiscoveryError::Unreachable {
        endpoint: "mdw:5432".to_string(),
        reason: "connection refused".to_string(),
    }
    .into();
    assert!(unreachable.is_transient());

    let failed: Error = DiscoveryError::QueryFailed {
        endpoint: "mdw:5432".to_string(),
        exit_code: 1,
        stderr: "relation does not exist".to_string(),
    }
    .into();
    assert!(!failed.is_transient());
}

#[test]
fn test_state_mismatch_reports_observed_rows() {
    let err = StateMismatchError {
        check: "standby entries".to_string(),
        expected: "exactly 1 standby row".to_string(),
        observed: vec!["dbid=1".to_string(), "dbid=9".to_string()],
    };
    let msg = err.to_string();
    assert!(msg.contains("observed 2 row(s)"));
    assert!(msg.contains("dbid=9"));
    assert!(!Error::from(err).is_transient());
}

#[test]
fn test_timeout_error_message() {
    let err = TimeoutError {
        what: "standby streaming".to_string(),
        elapsed: Duration::from_secs(120),
        last_observed: Some("0 replication rows".to_string()),
    };
    let msg = err.to_string();
    assert!(msg.contains("120s"));
    assert!(msg.contains("0 replication rows"));

    let silent = TimeoutError {
        what: "x".to_string(),
        elapsed: Duration::from_secs(1),
        last_observed: None,
    };
    assert!(silent.to_string().contains("nothing"));
}

#[test]
fn test_rank_order_error_names_both_ranks() {
    let err = RankOrderError {
        earlier_rank: 7,
        earlier_started: "2024-01-01 10:00:05".to_string(),
        later_rank: 8,
        later_started: "2024-01-01 10:00:01".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("rank 8"));
    assert!(msg.contains("rank 7"));
}

#[test]
fn test_process_control_errors_are_fatal() {
    let err: Error = ProcessControlError::ProbeFailed {
        probe: "pgrep postgres".to_string(),
        host: "localhost".to_string(),
        exit_code: 3,
        stderr: "pgrep: invalid option".to_string(),
    }
    .into();
    assert!(!err.is_transient());
}

#[test]
fn test_unissued_control_command_inherits_transport_transience() {
    let err: Error = ProcessControlError::NotIssued {
        action: "kill -0".to_string(),
        host: "sdw1".to_string(),
        source: Box::new(
            ExecutionFailed {
                command: "kill -0".to_string(),
                target: Target::Remote("sdw1".to_string()),
                cause: "Connection timed out".to_string(),
            }
            .into(),
        ),
    }
    .into();
    assert!(err.is_transient());
}
