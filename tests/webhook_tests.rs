//! # Admission Webhook Integration Tests
//!
//! Drives the webhook router in-process with AdmissionReview payloads as the
//! API server sends them.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use monitoring_operator::webhook::{webhook_router, WebhookState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const PUBLIC_NAMESPACE: &str = "octopilot-monitoring-public";

fn review(kind: &str, plural: &str, namespace: Option<&str>, object: Value) -> Value {
    let name = object["metadata"]["name"].clone();
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": "monitoring.octopilot.io", "version": "v1", "kind": kind},
            "resource": {"group": "monitoring.octopilot.io", "version": "v1", "resource": plural},
            "name": name,
            "namespace": namespace,
            "operation": "CREATE",
            "userInfo": {"username": "admin"},
            "object": object,
            "oldObject": null,
            "dryRun": false
        }
    })
}

fn pod_monitoring(interval: &str, scheme: Option<&str>) -> Value {
    let mut endpoint = json!({"port": "metrics", "interval": interval, "path": "/metrics"});
    if let Some(scheme) = scheme {
        endpoint["scheme"] = json!(scheme);
    }
    json!({
        "apiVersion": "monitoring.octopilot.io/v1",
        "kind": "PodMonitoring",
        "metadata": {"name": "frontend", "namespace": "ns1"},
        "spec": {
            "selector": {"matchLabels": {"app": "frontend"}},
            "endpoints": [endpoint]
        }
    })
}

async fn post(path: &str, body: &Value) -> (StatusCode, Value) {
    let app = webhook_router(Arc::new(WebhookState::new(PUBLIC_NAMESPACE)));
    let response = app
        .oneshot(
            Request::post(path)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn validate(plural: &str, body: &Value) -> Value {
    let (status, review) = post(
        &format!("/validate/monitoring.octopilot.io/v1/{plural}"),
        body,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    review["response"].clone()
}

#[tokio::test]
async fn test_valid_pod_monitoring_is_allowed() {
    let body = review(
        "PodMonitoring",
        "podmonitorings",
        Some("ns1"),
        pod_monitoring("30s", Some("http")),
    );
    let response = validate("podmonitorings", &body).await;
    assert_eq!(response["allowed"], true);
    assert_eq!(response["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
}

#[tokio::test]
async fn test_uncompilable_pod_monitoring_is_denied() {
    let body = review(
        "PodMonitoring",
        "podmonitorings",
        Some("ns1"),
        pod_monitoring("soon", None),
    );
    let response = validate("podmonitorings", &body).await;
    assert_eq!(response["allowed"], false);
    let message = response["status"]["message"].as_str().unwrap();
    assert!(message.contains("soon"), "unexpected message: {message}");
}

#[tokio::test]
async fn test_rule_with_record_and_alert_is_denied() {
    let rules = json!({
        "apiVersion": "monitoring.octopilot.io/v1",
        "kind": "Rules",
        "metadata": {"name": "alerts", "namespace": "ns1"},
        "spec": {
            "groups": [{
                "name": "g",
                "rules": [{"record": "r", "alert": "A", "expr": "up"}]
            }]
        }
    });
    let response = validate("rules", &review("Rules", "rules", Some("ns1"), rules)).await;
    assert_eq!(response["allowed"], false);
}

#[tokio::test]
async fn test_operator_config_must_be_the_singleton() {
    let config = |name: &str, namespace: &str| {
        json!({
            "apiVersion": "monitoring.octopilot.io/v1",
            "kind": "OperatorConfig",
            "metadata": {"name": name, "namespace": namespace},
            "spec": {}
        })
    };

    let allowed = validate(
        "operatorconfigs",
        &review(
            "OperatorConfig",
            "operatorconfigs",
            Some(PUBLIC_NAMESPACE),
            config("config", PUBLIC_NAMESPACE),
        ),
    )
    .await;
    assert_eq!(allowed["allowed"], true);

    let wrong_name = validate(
        "operatorconfigs",
        &review(
            "OperatorConfig",
            "operatorconfigs",
            Some(PUBLIC_NAMESPACE),
            config("other", PUBLIC_NAMESPACE),
        ),
    )
    .await;
    assert_eq!(wrong_name["allowed"], false);

    let wrong_namespace = validate(
        "operatorconfigs",
        &review(
            "OperatorConfig",
            "operatorconfigs",
            Some("default"),
            config("config", "default"),
        ),
    )
    .await;
    assert_eq!(wrong_namespace["allowed"], false);
}

/// Apply the patch of a defaulting response to the object as submitted,
/// the way the API server does
fn apply_patch(response: &Value, submitted: &Value) -> Value {
    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");

    let encoded = response["patch"].as_str().expect("patch is base64 encoded");
    let patch: json_patch::Patch =
        serde_json::from_slice(&BASE64.decode(encoded).unwrap()).unwrap();
    let mut patched = submitted.clone();
    json_patch::patch(&mut patched, &patch).unwrap();
    patched
}

#[tokio::test]
async fn test_defaulting_patch_applies_to_submitted_pod_monitoring() {
    // No targetLabels at all: the patch must create the parent, not a leaf under it
    let submitted = pod_monitoring("30s", None);
    let body = review("PodMonitoring", "podmonitorings", Some("ns1"), submitted.clone());
    let (status, review) = post("/default/monitoring.octopilot.io/v1/podmonitorings", &body).await;
    assert_eq!(status, StatusCode::OK);

    let patched = apply_patch(&review["response"], &submitted);
    assert_eq!(patched["spec"]["endpoints"][0]["scheme"], "http");
    assert_eq!(
        patched["spec"]["targetLabels"]["metadata"],
        json!(["container", "pod"])
    );
    // Untouched fields survive as submitted
    assert_eq!(patched["spec"]["endpoints"][0]["interval"], "30s");
    assert_eq!(patched["metadata"], submitted["metadata"]);
}

#[tokio::test]
async fn test_defaulting_patch_applies_to_empty_operator_config() {
    let submitted = json!({
        "apiVersion": "monitoring.octopilot.io/v1",
        "kind": "OperatorConfig",
        "metadata": {"name": "config", "namespace": PUBLIC_NAMESPACE},
        "spec": {}
    });
    let body = review(
        "OperatorConfig",
        "operatorconfigs",
        Some(PUBLIC_NAMESPACE),
        submitted.clone(),
    );
    let (status, review) = post("/default/monitoring.octopilot.io/v1/operatorconfigs", &body).await;
    assert_eq!(status, StatusCode::OK);

    let patched = apply_patch(&review["response"], &submitted);
    assert_eq!(patched["spec"]["collection"]["compression"], "none");
    assert_eq!(
        patched["spec"]["managedAlertmanager"]["configSecret"],
        json!({"name": "alertmanager", "key": "alertmanager.yaml"})
    );
}

#[tokio::test]
async fn test_defaulted_object_gets_no_patch() {
    let mut object = pod_monitoring("30s", Some("https"));
    object["spec"]["targetLabels"] = json!({"metadata": ["pod"]});
    let body = review("PodMonitoring", "podmonitorings", Some("ns1"), object);
    let (_, review) = post("/default/monitoring.octopilot.io/v1/podmonitorings", &body).await;
    assert_eq!(review["response"]["allowed"], true);
    assert!(review["response"]["patch"].is_null());
}

#[tokio::test]
async fn test_unknown_resource_is_not_found() {
    let body = review("Pod", "pods", Some("ns1"), json!({"metadata": {"name": "p"}}));
    let (status, error) = post("/validate/monitoring.octopilot.io/v1/pods", &body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error["error"].as_str().unwrap().contains("pods"));

    // rules have no defaulter
    let (status, _) = post("/default/monitoring.octopilot.io/v1/rules", &body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
