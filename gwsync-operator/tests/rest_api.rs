//! REST API integration tests for gwsync-operator.
//!
//! Every test runs the REST API and the controller against an in-memory store
//! and a mock control plane.

mod common;

use gwsync_core::{Identity, RemoteKind};
use serde_json::{Value, json};

const A1: &str = "/resources/apidefinitions/default/a1";
const P1: &str = "/resources/securitypolicies/default/p1";

fn api(name: &str) -> Value {
    json!({
        "name": name,
        "active": true,
        "proxy": {"listen_path": "/httpbin", "target_url": "http://httpbin.org"}
    })
}

fn policy(target: &str) -> Value {
    json!({
        "name": "p1",
        "active": true,
        "access_rights_array": [{"target": {"name": target}, "versions": ["Default"]}]
    })
}

fn remote_id(resource: &Value) -> Option<&str> {
    resource["status"]["remote_id"].as_str().filter(|id| !id.is_empty())
}

// =============================================================================
// Version Endpoint
// =============================================================================

#[tokio::test]
async fn test_get_version() {
    let server = common::TestServer::spawn().await;

    let response = server.get("/version").await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert!(body["version"].is_string());
    assert!(!body["version"].as_str().unwrap().is_empty());

    server.shutdown().await;
}

// =============================================================================
// Resource Endpoints
// =============================================================================

#[tokio::test]
async fn test_apply_and_get_resource() {
    let server = common::TestServer::spawn().await;

    let response = server.put_json(A1, &api("Httpbin")).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "api_definition");
    assert_eq!(body["namespace"], "default");
    assert_eq!(body["name"], "a1");
    assert_eq!(body["generation"], 1);
    assert_eq!(body["spec"]["name"], "Httpbin");

    let s = &server;
    common::eventually("a1 to be pushed", || async move {
        s.resource(A1).await.as_ref().and_then(remote_id).is_some()
    })
    .await;

    let a1 = server.resource(A1).await.unwrap();
    assert!(
        a1["finalizers"]
            .as_array()
            .unwrap()
            .contains(&json!("finalizers.gwsync.io/apidefinition"))
    );
    assert_eq!(a1["status"]["failure_count"], 0);
    assert_eq!(a1["status"]["last_transaction"]["status"], "Successful");
    assert_eq!(server.backend.creates(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unchanged_apply_keeps_generation() {
    let server = common::TestServer::spawn().await;

    server.put_json(A1, &api("Httpbin")).await;
    let response = server.put_json(A1, &api("Httpbin")).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["generation"], 1);

    let response = server.put_json(A1, &api("Renamed")).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["generation"], 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_resources_by_namespace() {
    let server = common::TestServer::spawn().await;

    server
        .put_json("/resources/apidefinitions/default/a1", &api("One"))
        .await;
    server
        .put_json("/resources/apidefinitions/other/a2", &api("Two"))
        .await;

    let all: Vec<Value> = server
        .get("/resources/apidefinitions")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let other: Vec<Value> = server
        .get("/resources/api_definition?namespace=other")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(other.len(), 1);
    assert_eq!(other[0]["name"], "a2");

    server.shutdown().await;
}

#[tokio::test]
async fn test_bad_requests() {
    let server = common::TestServer::spawn().await;

    let response = server.get("/resources/virtualmachines").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 400);

    let response = server.get(A1).await;
    assert_eq!(response.status(), 404);

    let response = server.put_json(A1, &json!(["not", "an", "object"])).await;
    assert_eq!(response.status(), 400);

    let response = server.delete(A1).await;
    assert_eq!(response.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_deletion_safety_of_missing_resource() {
    let server = common::TestServer::spawn().await;

    let response = server.get(&format!("{}/deletion-safety", A1)).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["phase"], "removed");
    assert_eq!(body["blocked"], false);
    assert_eq!(body["remote_present"], false);

    server.shutdown().await;
}

// =============================================================================
// Reconcile Flows
// =============================================================================

#[tokio::test]
async fn test_referenced_api_is_deleted_after_policy() {
    let server = common::TestServer::spawn().await;
    let s = &server;

    server.put_json(A1, &api("Httpbin")).await;
    common::eventually("a1 to be pushed", || async move {
        s.resource(A1).await.as_ref().and_then(remote_id).is_some()
    })
    .await;

    server.put_json(P1, &policy("a1")).await;
    common::eventually("p1 to be linked to a1", || async move {
        let a1 = s.resource(A1).await.unwrap();
        a1["status"]["reverse_links"]
            .as_array()
            .is_some_and(|links| links.len() == 1)
    })
    .await;

    // a1 is referenced, so its deletion is blocked
    let response = server.delete(A1).await;
    assert_eq!(response.status(), 202);
    common::eventually("a1 to be blocked", || async move {
        let body: Value = s
            .get(&format!("{}/deletion-safety", A1))
            .await
            .json()
            .await
            .unwrap();
        body["phase"] == "blocked"
    })
    .await;

    let safety: Value = server
        .get(&format!("{}/deletion-safety", A1))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(safety["blocked"], true);
    assert_eq!(safety["blockers"], json!(["security_policy default/p1"]));
    assert_eq!(safety["remote_present"], true);

    let a1 = server.resource(A1).await.unwrap();
    assert_eq!(a1["deletion_requested"], true);
    assert_eq!(server.backend.objects(RemoteKind::Api).len(), 1);

    // No spec changes while pending deletion
    let response = server.put_json(A1, &api("Changed")).await;
    assert_eq!(response.status(), 409);

    // Deleting p1 releases a1
    let response = server.delete(P1).await;
    assert_eq!(response.status(), 202);
    common::eventually("both resources to be gone", || async move {
        s.resource(P1).await.is_none() && s.resource(A1).await.is_none()
    })
    .await;

    assert!(server.backend.objects(RemoteKind::Api).is_empty());
    assert!(server.backend.objects(RemoteKind::Policy).is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_api_change_is_propagated_to_policy() {
    let server = common::TestServer::spawn().await;
    let s = &server;

    server.put_json(A1, &api("Httpbin")).await;
    server.put_json(P1, &policy("a1")).await;
    common::eventually("p1 to be pushed", || async move {
        s.resource(P1).await.as_ref().and_then(remote_id).is_some()
    })
    .await;

    let p1 = server.resource(P1).await.unwrap();
    let policy_id = remote_id(&p1).unwrap().to_string();
    let access_key = Identity::new("default", "a1").encoded();

    server.put_json(A1, &api("Renamed")).await;
    let policy_id = policy_id.as_str();
    let access_key = access_key.as_str();
    common::eventually("p1 to pick up the new API name", || async move {
        s.backend
            .object(RemoteKind::Policy, policy_id)
            .is_some_and(|remote| remote["access_rights"][access_key]["api_name"] == "Renamed")
    })
    .await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_policy_waits_for_missing_api() {
    let server = common::TestServer::spawn().await;
    let s = &server;

    server.put_json(P1, &policy("a1")).await;
    common::eventually("p1 to record the failure", || async move {
        let p1 = s.resource(P1).await.unwrap();
        p1["status"]["last_transaction"]["status"] == "Failed"
    })
    .await;
    assert!(server.backend.objects(RemoteKind::Policy).is_empty());

    server.put_json(A1, &api("Httpbin")).await;
    common::eventually("p1 to be pushed once a1 exists", || async move {
        s.resource(P1).await.as_ref().and_then(remote_id).is_some()
    })
    .await;

    let p1 = server.resource(P1).await.unwrap();
    assert_eq!(p1["status"]["failure_count"], 0);

    server.shutdown().await;
}
