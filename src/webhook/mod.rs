//! # Admission Webhooks
//!
//! HTTPS endpoints the API server calls before persisting monitoring
//! resources:
//!
//! - `POST /validate/monitoring.octopilot.io/v1/{plural}` rejects objects the
//!   reconciler would fail to compile
//! - `POST /default/monitoring.octopilot.io/v1/{plural}` returns a JSON patch
//!   filling in defaults
//!
//! Validation runs the same compiler functions as the reconciler on the single
//! object, so an admitted object never fails compilation later for a reason
//! that could have been caught up front.

mod mutate;
mod validate;

pub use mutate::default_object;
pub use validate::validate_object;

use crate::certs::CertMaterial;
use crate::crd::MonitoringKind;
use crate::observability::metrics;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("no webhook for resource '{0}'")]
    UnknownResource(String),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("webhook server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("failed to encode admission review: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::UnknownResource(_) => StatusCode::NOT_FOUND,
            WebhookError::Tls(_) | WebhookError::Serve(_) | WebhookError::Encode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Shared state of the webhook handlers
#[derive(Debug, Clone)]
pub struct WebhookState {
    pub public_namespace: String,
}

impl WebhookState {
    #[must_use]
    pub fn new(public_namespace: impl Into<String>) -> Self {
        Self {
            public_namespace: public_namespace.into(),
        }
    }
}

fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

fn kind_for(plural: &str, defaulting: bool) -> Result<MonitoringKind, WebhookError> {
    MonitoringKind::from_plural(plural)
        .filter(|kind| !defaulting || kind.has_defaulter())
        .ok_or_else(|| WebhookError::UnknownResource(plural.to_string()))
}

/// The review answering `response`, as sent to the API server
///
/// `admission.k8s.io/v1` carries the patch as base64 encoded bytes, while
/// [`AdmissionResponse`] would serialize it as an array of numbers.
fn review_body(mut response: AdmissionResponse) -> Result<Json<Value>, WebhookError> {
    let patch = response.patch.take();
    let mut review = serde_json::to_value(response.into_review())?;
    if let (Some(patch), Some(body)) = (patch, review.get_mut("response")) {
        body["patch"] = Value::String(BASE64.encode(patch));
    }
    Ok(Json(review))
}

/// Decode the review, or answer it directly when it is malformed
fn into_request(
    review: AdmissionReview<DynamicObject>,
) -> Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    let req: Result<AdmissionRequest<DynamicObject>, _> = review.try_into();
    req.map_err(|e| {
        error!(error = %e, "Failed to parse admission request");
        AdmissionResponse::invalid(e.to_string())
    })
}

async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Path(plural): Path<String>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<Value>, WebhookError> {
    let kind = kind_for(&plural, false)?;
    let req = match into_request(review) {
        Ok(req) => req,
        Err(response) => return review_body(response),
    };

    let response = match validate_object(kind, &req, &state.public_namespace) {
        Ok(()) => AdmissionResponse::from(&req),
        Err(reason) => {
            info!(
                uid = %req.uid,
                resource.kind = %kind,
                resource.name = %req.name,
                "Denied admission: {}",
                reason
            );
            AdmissionResponse::from(&req).deny(reason)
        }
    };
    metrics::record_admission_request(
        kind.as_str(),
        operation_name(&req.operation),
        response.allowed,
    );
    review_body(response)
}

async fn default_handler(
    Path(plural): Path<String>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<Value>, WebhookError> {
    let kind = kind_for(&plural, true)?;
    let req = match into_request(review) {
        Ok(req) => req,
        Err(response) => return review_body(response),
    };

    let response = match default_object(kind, &req) {
        Ok(None) => AdmissionResponse::from(&req),
        Ok(Some(patch)) => {
            debug!(uid = %req.uid, resource.kind = %kind, ops = patch.0.len(), "Defaulting object");
            match AdmissionResponse::from(&req).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(uid = %req.uid, error = %e, "Failed to serialize patch");
                    AdmissionResponse::from(&req).deny(format!("patch serialization error: {e}"))
                }
            }
        }
        Err(reason) => AdmissionResponse::from(&req).deny(reason),
    };
    metrics::record_admission_request(
        kind.as_str(),
        operation_name(&req.operation),
        response.allowed,
    );
    review_body(response)
}

/// Routes of the webhook server
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(
            "/validate/monitoring.octopilot.io/v1/{plural}",
            post(validate_handler),
        )
        .route(
            "/default/monitoring.octopilot.io/v1/{plural}",
            post(default_handler),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve the webhooks over TLS until `cancel` fires
pub async fn serve(
    port: u16,
    state: Arc<WebhookState>,
    material: &CertMaterial,
    cancel: CancellationToken,
) -> Result<(), WebhookError> {
    let tls = RustlsConfig::from_pem(
        material.cert_pem.as_bytes().to_vec(),
        material.key_pem.as_bytes().to_vec(),
    )
    .await
    .map_err(WebhookError::Tls)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    info!("Webhook server listening on {}", addr);
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(WebhookError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_lookup() {
        assert_eq!(
            kind_for("podmonitorings", false).unwrap(),
            MonitoringKind::PodMonitoring
        );
        assert_eq!(kind_for("rules", false).unwrap(), MonitoringKind::Rules);
        // rules have no defaulter
        assert!(matches!(
            kind_for("rules", true),
            Err(WebhookError::UnknownResource(_))
        ));
        assert!(kind_for("deployments", false).is_err());
    }

    #[test]
    fn test_patch_is_base64_on_the_wire() {
        let mut response = AdmissionResponse::invalid("unused");
        response.patch = Some(br#"[{"op":"add","path":"/spec/x","value":1}]"#.to_vec());

        let Json(review) = review_body(response).unwrap();
        let encoded = review["response"]["patch"].as_str().unwrap();
        assert_eq!(
            BASE64.decode(encoded).unwrap(),
            br#"[{"op":"add","path":"/spec/x","value":1}]"#.to_vec()
        );
    }

    #[test]
    fn test_review_without_patch_has_no_patch_field() {
        let Json(review) = review_body(AdmissionResponse::invalid("bad")).unwrap();
        assert!(review["response"].get("patch").is_none());
    }

    #[test]
    fn test_unknown_resource_is_not_found() {
        let response = WebhookError::UnknownResource("pods".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
