#![allow(clippy::unwrap_used)]

/// Tests for parallel branches: output folding, compete mode, branch waits
/// and context exports.
use rook::{Engine, InstanceStatus};
use serde_json::json;
use std::time::Duration;

async fn run(yaml: &str, input: serde_json::Value) -> rook::Instance {
    let engine = Engine::builder().build();
    let key = engine.register_yaml(yaml).unwrap();
    let id = engine.start(&key, input).await.unwrap();
    engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap()
}

#[tokio::test]
async fn test_fork_merges_outputs_by_branch_name() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: fork-merge
  version: '0.1.0'
do:
  - split:
      fork:
        branches:
          - inventory:
              set:
                reserved: true
          - pricing:
              set:
                price: 42
"#;
    let instance = run(yaml, json!({})).await;
    let output = instance.output.unwrap();
    assert_eq!(output["inventory"]["reserved"], true);
    assert_eq!(output["pricing"]["price"], 42);
}

#[tokio::test]
async fn test_compete_returns_first_completion_only() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: fork-compete
  version: '0.1.0'
do:
  - race:
      fork:
        compete: true
        branches:
          - fast:
              set:
                winner: fast
          - slow:
              do:
                - pause:
                    wait: PT10S
                - late:
                    set:
                      winner: slow
"#;
    let started = std::time::Instant::now();
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.output.unwrap()["winner"], "fast");
    assert!(started.elapsed() < Duration::from_secs(5), "loser must be dropped, not awaited");
}

#[tokio::test]
async fn test_branch_error_faults_the_fork() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: fork-fault
  version: '0.1.0'
do:
  - split:
      fork:
        branches:
          - ok:
              set:
                fine: true
          - bad:
              raise:
                error:
                  status: 502
                  title: Bad Gateway
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    let error = instance.error.unwrap();
    assert_eq!(error.status, 502);
    assert_eq!(
        error.instance.as_deref(),
        Some("/do/0/split/fork/branches/1/bad"),
        "the fault points at the raising task inside the branch"
    );
}

#[tokio::test]
async fn test_fork_error_is_catchable_on_the_main_cursor() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: fork-caught
  version: '0.1.0'
do:
  - guarded:
      try:
        - split:
            fork:
              branches:
                - bad:
                    raise:
                      error:
                        status: 502
                        title: Bad Gateway
      catch:
        do:
          - recover:
              set:
                recovered: true
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.output.unwrap()["recovered"], true);
}

#[tokio::test]
async fn test_branch_exports_merge_into_shared_context() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: fork-export
  version: '0.1.0'
do:
  - split:
      fork:
        branches:
          - left:
              set:
                l: 1
              export:
                as: '${ { left: .l } }'
          - right:
              set:
                r: 2
              export:
                as: '${ { right: .r } }'
  - readBack:
      set:
        both: '${ [$context.left, $context.right] }'
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.output.unwrap()["both"], json!([1, 2]));
}

#[tokio::test]
async fn test_branch_can_wait_on_a_timer() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: fork-wait
  version: '0.1.0'
do:
  - split:
      fork:
        branches:
          - patient:
              do:
                - pause:
                    wait: PT0.05S
                - done:
                    set:
                      waited: true
          - eager:
              set:
                eager: true
"#;
    let instance = run(yaml, json!({})).await;
    let output = instance.output.unwrap();
    assert_eq!(output["patient"]["waited"], true);
    assert_eq!(output["eager"]["eager"], true);
}

#[tokio::test]
async fn test_end_inside_branch_ends_only_that_branch() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: fork-branch-end
  version: '0.1.0'
do:
  - split:
      fork:
        branches:
          - short:
              do:
                - stop:
                    set:
                      stopped: true
                    then: end
                - unreachable:
                    set:
                      unreachable: true
          - long:
              set:
                long: true
  - after:
      set:
        after: true
"#;
    let instance = run(yaml, json!({})).await;
    let output = instance.output.unwrap();
    assert_eq!(output["after"], true, "the workflow continues past the fork");
    assert_eq!(output["short"]["stopped"], true);
    assert!(output["short"].get("unreachable").is_none());
}
