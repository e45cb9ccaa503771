use std::time::Duration;

use super::*;
use crate::test_utils::*;
use crate::MockRemoteExecutor;

fn context() -> ScenarioContext {
    ScenarioContext::new(HarnessConfig::default())
}

fn executor_returning(exit_code: i32) -> Arc<MockRemoteExecutor> {
    let mut executor = MockRemoteExecutor::new();
    executor
        .expect_execute()
        .returning(move |_, _| Ok(output("redistributed", "", exit_code)));
    Arc::new(executor)
}

#[test]
fn scenario_ids_are_unique() {
    let a = context();
    let b = context();
    assert_eq!(a.id().len(), 10);
    assert_ne!(a.id(), b.id());
}

#[test]
fn saved_segments_are_looked_up_by_selector() {
    let cluster = Cluster::from_rows(&mirrored_cluster_rows()).unwrap();
    let mut context = context();

    let saved = context.save_segment(SegmentSelector::Primary, &cluster).unwrap().dbid;
    assert_eq!(saved, 2);
    assert_eq!(context.saved(SegmentSelector::Primary).unwrap().dbid, 2);
    assert!(matches!(
        context.saved(SegmentSelector::Mirror),
        Err(Error::Scenario(_))
    ));
}

#[test]
fn saving_missing_kind_fails() {
    let cluster = Cluster::from_rows(&mirrored_cluster_rows()).unwrap();
    let mut context = context();

    assert!(context.save_segment(SegmentSelector::Standby, &cluster).is_err());
}

#[test]
fn expansion_baseline_must_be_recorded() {
    let mut context = context();
    assert!(context.expansion_baseline().is_err());

    context.record_expansion_baseline(4);
    assert_eq!(context.expansion_baseline().unwrap(), 4);
}

#[test]
fn failover_plan_is_owned_by_context() {
    let mut context = context();
    assert!(context.failover_mut().is_err());

    let master = Segment::from_row(&mirrored_cluster_rows()[0]).unwrap();
    context.set_failover(FailoverPlan::new(master));
    assert_eq!(context.failover_mut().unwrap().source.dbid, 1);
    assert!(context.take_failover().is_some());
    assert!(context.take_failover().is_none());
}

#[tokio::test]
async fn only_one_detached_command_at_a_time() {
    let mut context = context();
    let executor = executor_returning(0);

    context
        .spawn_detached(executor.clone(), ShellCommand::new("redistribute", "gpexpand"), Target::Local)
        .unwrap();
    let err = context
        .spawn_detached(executor, ShellCommand::new("second", "true"), Target::Local)
        .unwrap_err();
    assert!(err.to_string().contains("redistribute"));

    let output = context.join_detached(0, Duration::from_secs(5)).await.unwrap();
    assert_eq!(output.stdout, "redistributed");
    assert!(!context.has_detached());
    assert_eq!(context.last_output().map(|o| o.exit_code), Some(0));
}

#[tokio::test]
async fn join_detached_checks_exit_code() {
    let mut context = context();
    context
        .spawn_detached(
            executor_returning(1),
            ShellCommand::new("redistribute", "gpexpand"),
            Target::remote("mdw"),
        )
        .unwrap();

    match context.join_detached(0, Duration::from_secs(5)).await.unwrap_err() {
        Error::ActionFailed {
            action,
            target,
            exit_code,
            ..
        } => {
            assert_eq!(action, "redistribute");
            assert_eq!(target, Target::remote("mdw"));
            assert_eq!(exit_code, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn join_without_spawn_is_a_scenario_error() {
    let mut context = context();
    assert!(matches!(
        context.join_detached(0, Duration::from_secs(1)).await,
        Err(Error::Scenario(_))
    ));
}
