use std::collections::HashMap;

use dipeo_state::{ExecutionStatus, NodeExecutionStatus, NodeOutput, SqliteStateStore, StateStore};
use serde_json::json;

async fn store() -> SqliteStateStore {
    SqliteStateStore::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite connects and migrates")
}

#[tokio::test]
async fn create_and_fetch_round_trips_through_sqlite() {
    let store = store().await;
    store
        .create_execution("exec-1".into(), Some("diagram-1".into()), None)
        .await
        .unwrap();

    let state = store.get_state("exec-1").await.unwrap().unwrap();
    assert_eq!(state.status, ExecutionStatus::Started);
    assert_eq!(state.diagram_id.as_deref(), Some("diagram-1"));
}

#[tokio::test]
async fn node_completion_persists_output_and_token_usage() {
    let store = store().await;
    store.create_execution("exec-1".into(), None, None).await.unwrap();

    let mut metadata = HashMap::new();
    metadata.insert("tokenUsage".to_string(), json!({"input": 3, "output": 2, "cached": null, "total": 5}));
    let output = NodeOutput {
        value: json!({"x": 1}),
        metadata,
    };

    store
        .update_node_status("exec-1", "A", NodeExecutionStatus::Completed, Some(output), None, None)
        .await
        .unwrap();

    let state = store.get_state("exec-1").await.unwrap().unwrap();
    assert_eq!(state.node_outputs["A"].value, json!({"x": 1}));
    assert_eq!(state.token_usage.total, 5);
}

#[tokio::test]
async fn variables_merge_shallowly() {
    let store = store().await;
    let mut initial = HashMap::new();
    initial.insert("a".to_string(), json!(1));
    store.create_execution("exec-1".into(), None, Some(initial)).await.unwrap();

    let mut patch = HashMap::new();
    patch.insert("b".to_string(), json!(2));
    store.update_variables("exec-1", patch).await.unwrap();

    let state = store.get_state("exec-1").await.unwrap().unwrap();
    assert_eq!(state.variables["a"], json!(1));
    assert_eq!(state.variables["b"], json!(2));
}

#[tokio::test]
async fn list_executions_is_newest_first_and_paginated() {
    let store = store().await;
    for i in 0..3 {
        store.create_execution(format!("exec-{i}"), None, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
    }

    let page = store.list_executions(2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].execution_id, "exec-2");
    assert_eq!(page[1].execution_id, "exec-1");
}

#[tokio::test]
async fn cleanup_old_states_deletes_nothing_within_retention() {
    let store = store().await;
    store.create_execution("exec-1".into(), None, None).await.unwrap();
    let deleted = store.cleanup_old_states(7).await.unwrap();
    assert_eq!(deleted, 0);
    assert!(store.get_state("exec-1").await.unwrap().is_some());
}

#[tokio::test]
async fn mutating_unknown_execution_is_not_found() {
    let store = store().await;
    let err = store
        .update_status("missing", ExecutionStatus::Aborted, None)
        .await
        .unwrap_err();
    assert!(matches!(err, dipeo_state::StateStoreError::NotFound(_)));
}
