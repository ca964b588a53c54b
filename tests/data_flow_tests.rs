#![allow(clippy::unwrap_used)]

/// Tests for the input/output/export pipelines and schema checks.
use rook::{Engine, ErrorKind, InstanceStatus};
use serde_json::json;
use std::time::Duration;

async fn run(yaml: &str, input: serde_json::Value) -> rook::Instance {
    let engine = Engine::builder().build();
    let key = engine.register_yaml(yaml).unwrap();
    let id = engine.start(&key, input).await.unwrap();
    engine.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap()
}

#[tokio::test]
async fn test_workflow_input_from_reshapes_initial_data() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: input-from
  version: '0.1.0'
input:
  from: '.payload'
do:
  - compute:
      set:
        doubled: '${ .n * 2 }'
"#;
    let instance = run(yaml, json!({"payload": {"n": 5}, "envelope": "dropped"})).await;
    let output = instance.output.unwrap();
    assert_eq!(output["doubled"], 10);
    assert!(output.get("envelope").is_none());
}

#[tokio::test]
async fn test_workflow_output_as_shapes_final_result() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: output-as
  version: '0.1.0'
output:
  as: '${ { total: .sum } }'
do:
  - compute:
      set:
        sum: 7
        scratch: true
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.output.unwrap(), json!({"total": 7}));
}

#[tokio::test]
async fn test_task_output_as_applies_before_flow_continues() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: task-output
  version: '0.1.0'
do:
  - fetch:
      set:
        body:
          id: o-1
          internal: secret
      output:
        as: '${ .body | { id } }'
  - tag:
      set:
        tagged: true
"#;
    let instance = run(yaml, json!({})).await;
    let output = instance.output.unwrap();
    assert_eq!(output["id"], "o-1");
    assert!(output.get("body").is_none(), "task output transform reshapes the flow");
    assert_eq!(output["tagged"], true);
}

#[tokio::test]
async fn test_export_publishes_into_context_for_later_tasks() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: export-readback
  version: '0.1.0'
do:
  - remember:
      set:
        orderId: o-9
      export:
        as: '${ { order: .orderId } }'
  - reset:
      set: '${ {} }'
  - recall:
      set:
        fromContext: '${ $context.order }'
"#;
    let instance = run(yaml, json!({})).await;
    let output = instance.output.unwrap();
    assert_eq!(output["fromContext"], "o-9", "context survives a data reset");
}

#[tokio::test]
async fn test_input_schema_violation_faults_with_validation() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: input-schema
  version: '0.1.0'
input:
  schema:
    type: object
    required: [orderId]
do:
  - noop:
      set:
        ok: true
"#;
    let instance = run(yaml, json!({"wrong": 1})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    assert!(instance.error.unwrap().is_kind(ErrorKind::Validation));
}

#[tokio::test]
async fn test_task_input_from_narrows_the_data() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: task-input
  version: '0.1.0'
do:
  - narrow:
      input:
        from: '.order'
      set:
        sku: '${ .lines[0].sku }'
"#;
    let input = json!({"order": {"lines": [{"sku": "widget"}]}, "noise": true});
    let instance = run(yaml, input).await;
    assert_eq!(instance.output.unwrap()["sku"], "widget");
}

#[tokio::test]
async fn test_output_schema_violation_faults() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: output-schema
  version: '0.1.0'
do:
  - produce:
      set:
        count: notANumber
      output:
        schema:
          type: object
          properties:
            count:
              type: number
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    let error = instance.error.unwrap();
    assert!(error.is_kind(ErrorKind::Validation));
    assert_eq!(error.instance.as_deref(), Some("/do/0/produce"));
}

#[tokio::test]
async fn test_empty_workflow_completes_with_its_input() {
    let yaml = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: empty
  version: '0.1.0'
do: []
"#;
    let instance = run(yaml, json!({"echo": 1})).await;
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.output.unwrap(), json!({"echo": 1}));
}
