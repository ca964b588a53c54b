#![allow(clippy::unwrap_used)]

/// Tests for raise, catch filters, retry accounting and fault surfacing.
use rook::connector::FnConnector;
use rook::{Engine, ErrorKind, InstanceStatus};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn flaky_engine(failures_before_success: u32) -> (Engine, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let engine = Engine::builder()
        .with_connector(
            "flaky.op",
            Arc::new(FnConnector::new(move |_: Value| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n <= failures_before_success {
                        Err(rook::connector::communication_error(format!("failure {n}")))
                    } else {
                        Ok(json!({"succeeded_on": n}))
                    }
                }
            })),
        )
        .build();
    (engine, calls)
}

const FLAKY_YAML: &str = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: flaky
  version: '0.1.0'
do:
  - guarded:
      try:
        - attempt:
            call: flaky.op
      catch:
        retry:
          delay: PT0S
          limit:
            attempt:
              count: 2
        do:
          - recover:
              set:
                caught: '${ $error.status }'
"#;

#[tokio::test]
async fn test_retry_recovers_when_attempts_suffice() {
    // Fails twice; limit allows two retries, so the third call succeeds.
    let (engine, calls) = flaky_engine(2);
    let key = engine.register_yaml(FLAKY_YAML).unwrap();
    let id = engine.start(&key, json!({})).await.unwrap();
    let instance = engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.output.unwrap()["succeeded_on"], 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fall_into_handler() {
    // Never succeeds: initial call plus two retries, then the handler.
    let (engine, calls) = flaky_engine(u32::MAX);
    let key = engine.register_yaml(FLAKY_YAML).unwrap();
    let id = engine.start(&key, json!({})).await.unwrap();
    let instance = engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.output.unwrap()["caught"], 500);
    assert_eq!(calls.load(Ordering::SeqCst), 3, "one initial call and two retries");
}

#[tokio::test]
async fn test_uncaught_error_faults_the_instance() {
    let engine = Engine::builder().build();
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: uncaught
  version: '0.1.0'
use:
  errors:
    outOfStock:
      status: 409
      title: Out Of Stock
do:
  - boom:
      raise:
        error: outOfStock
"#;
    let key = engine.register_yaml(yaml).unwrap();
    let id = engine.start(&key, json!({})).await.unwrap();
    let instance = engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Faulted);
    let error = instance.error.unwrap();
    assert_eq!(error.status, 409);
    assert_eq!(error.title, "Out Of Stock");
    assert_eq!(error.instance.as_deref(), Some("/do/0/boom"));
}

#[tokio::test]
async fn test_catch_filter_lets_unmatched_errors_propagate() {
    let engine = Engine::builder().build();
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: filter-miss
  version: '0.1.0'
do:
  - guarded:
      try:
        - boom:
            raise:
              error:
                status: 500
                title: Server Error
      catch:
        errors:
          with:
            status: 404
        do:
          - recover:
              set:
                recovered: true
"#;
    let key = engine.register_yaml(yaml).unwrap();
    let id = engine.start(&key, json!({})).await.unwrap();
    let instance = engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Faulted, "a 500 must not match a 404 filter");
    assert_eq!(instance.error.unwrap().status, 500);
}

#[tokio::test]
async fn test_caught_error_binds_named_variable() {
    let engine = Engine::builder().build();
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: bind-error
  version: '0.1.0'
do:
  - guarded:
      try:
        - boom:
            raise:
              error:
                status: 404
                title: Not Found
                detail: 'order ${ .orderId } missing'
      catch:
        as: problem
        do:
          - inspect:
              set:
                detail: '${ $problem.detail }'
                status: '${ $problem.status }'
"#;
    let key = engine.register_yaml(yaml).unwrap();
    let id = engine.start(&key, json!({"orderId": "o-42"})).await.unwrap();
    let instance = engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Completed);
    let output = instance.output.unwrap();
    assert_eq!(output["detail"], "order o-42 missing");
    assert_eq!(output["status"], 404);
}

#[tokio::test]
async fn test_nested_try_catches_at_the_innermost_matching_scope() {
    let engine = Engine::builder().build();
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: nested-try
  version: '0.1.0'
do:
  - outer:
      try:
        - inner:
            try:
              - boom:
                  raise:
                    error:
                      status: 404
                      title: Not Found
            catch:
              errors:
                with:
                  status: 500
              do:
                - innerHandler:
                    set:
                      handler: inner
      catch:
        do:
          - outerHandler:
              set:
                handler: outer
"#;
    let key = engine.register_yaml(yaml).unwrap();
    let id = engine.start(&key, json!({})).await.unwrap();
    let instance = engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(
        instance.output.unwrap()["handler"],
        "outer",
        "the inner filter does not match, so the outer catch handles it"
    );
}

#[tokio::test]
async fn test_expression_failures_raise_expression_errors() {
    let engine = Engine::builder().build();
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: bad-expression
  version: '0.1.0'
do:
  - compute:
      set: '${ .x | nosuchfunction }'
"#;
    let key = engine.register_yaml(yaml).unwrap();
    let id = engine.start(&key, json!({})).await.unwrap();
    let instance = engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Faulted);
    assert!(instance.error.unwrap().is_kind(ErrorKind::Expression));
}
