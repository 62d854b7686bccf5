//! Cluster-issued webhook certificates
//!
//! The operator submits a certificate signing request for the kubelet-serving
//! signer, approves it itself and waits for the signed certificate. Clusters
//! serve the signing request API as `certificates.k8s.io/v1` or, on older
//! versions, `v1beta1`; the first version the API server accepts is used.

use super::{CertError, CertMaterial};
use crate::config::ControllerConfig;
use crate::constants::{
    CSR_SIGNER_NAME, DEFAULT_CSR_ISSUE_TIMEOUT_SECS, DEFAULT_CSR_POLL_INTERVAL_MS,
    KUBE_ROOT_CA_CONFIG_MAP,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, PostParams};
use kube::{Api, Client};
use rcgen::{CertificateParams, DnType, KeyPair};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

const CSR_GROUP: &str = "certificates.k8s.io";
const CSR_KIND: &str = "CertificateSigningRequest";
const CSR_PLURAL: &str = "certificatesigningrequests";

/// Served version of the signing request API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrApi {
    V1,
    V1Beta1,
}

impl CsrApi {
    /// Versions in the order they are tried
    pub const PROBE_ORDER: [CsrApi; 2] = [CsrApi::V1, CsrApi::V1Beta1];

    #[must_use]
    pub fn version(self) -> &'static str {
        match self {
            CsrApi::V1 => "v1",
            CsrApi::V1Beta1 => "v1beta1",
        }
    }

    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(CSR_GROUP, self.version(), CSR_KIND),
            CSR_PLURAL,
        )
    }

    /// Signing request object for `csr_pem`
    #[must_use]
    pub fn request_object(self, name: &str, csr_pem: &str) -> DynamicObject {
        let mut object = DynamicObject::new(name, &self.api_resource());
        object.data = json!({
            "spec": {
                "request": BASE64.encode(csr_pem),
                "signerName": CSR_SIGNER_NAME,
                "usages": ["digital signature", "key encipherment", "server auth"],
            }
        });
        object
    }
}

/// The API server does not serve this version
fn is_unsupported(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 404 || e.code == 405)
}

fn is_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == code)
}

/// Add an `Approved` condition to a fetched signing request
#[must_use]
pub fn approval_body(mut object: DynamicObject) -> DynamicObject {
    let condition = json!({
        "type": "Approved",
        "status": "True",
        "reason": "AutoApproved",
        "message": "Approved by the monitoring operator for its webhook server",
        "lastUpdateTime": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    });
    let status = object
        .data
        .as_object_mut()
        .map(|data| data.entry("status").or_insert_with(|| json!({})));
    if let Some(Value::Object(status)) = status {
        status.insert("conditions".to_string(), Value::Array(vec![condition]));
    }
    object
}

/// Issued certificate of a signing request, `Ok(None)` while still pending
pub fn issued_certificate(object: &DynamicObject) -> Result<Option<String>, CertError> {
    let name = object.metadata.name.clone().unwrap_or_default();
    let status = &object.data["status"];

    if let Some(conditions) = status["conditions"].as_array() {
        for condition in conditions {
            if matches!(condition["type"].as_str(), Some("Denied" | "Failed")) {
                return Err(CertError::Denied {
                    name,
                    reason: condition["message"]
                        .as_str()
                        .or_else(|| condition["reason"].as_str())
                        .unwrap_or("no reason given")
                        .to_string(),
                });
            }
        }
    }

    match status["certificate"].as_str() {
        Some(encoded) if !encoded.is_empty() => {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| CertError::Invalid(format!("issued certificate: {e}")))?;
            let pem = String::from_utf8(bytes)
                .map_err(|e| CertError::Invalid(format!("issued certificate: {e}")))?;
            Ok(Some(pem))
        }
        _ => Ok(None),
    }
}

/// Create the signing request, replacing a leftover one with the same name
async fn create(api: &Api<DynamicObject>, object: &DynamicObject) -> Result<(), kube::Error> {
    let name = object.metadata.name.as_deref().unwrap_or_default();
    match api.create(&PostParams::default(), object).await {
        Ok(_) => Ok(()),
        Err(e) if is_status(&e, 409) => {
            debug!("Replacing existing signing request {}", name);
            match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(e) if is_status(&e, 404) => {}
                Err(e) => return Err(e),
            }
            api.create(&PostParams::default(), object).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_certificate(
    api: &Api<DynamicObject>,
    name: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<String, CertError> {
    let wait = async {
        loop {
            let object = api.get(name).await?;
            if let Some(pem) = issued_certificate(&object)? {
                return Ok::<_, CertError>(pem);
            }
            tokio::time::sleep(poll).await;
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| CertError::Timeout {
            name: name.to_string(),
            timeout,
        })?
}

/// Submit, approve and wait for one signing request on `api_version`
async fn issue(
    client: &Client,
    api_version: CsrApi,
    name: &str,
    csr_pem: &str,
) -> Result<String, CertError> {
    let api: Api<DynamicObject> = Api::all_with(client.clone(), &api_version.api_resource());

    create(&api, &api_version.request_object(name, csr_pem)).await?;

    let submitted = api.get(name).await?;
    let approval = serde_json::to_vec(&approval_body(submitted))?;
    api.replace_subresource("approval", name, &PostParams::default(), approval)
        .await?;
    info!("Approved signing request {} ({})", name, api_version.version());

    wait_for_certificate(
        &api,
        name,
        Duration::from_secs(DEFAULT_CSR_ISSUE_TIMEOUT_SECS),
        Duration::from_millis(DEFAULT_CSR_POLL_INTERVAL_MS),
    )
    .await
}

/// Cluster root CA, which signs kubelet-serving certificates
async fn cluster_ca_bundle(client: &Client, namespace: &str) -> Result<Vec<u8>, CertError> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    config_maps
        .get_opt(KUBE_ROOT_CA_CONFIG_MAP)
        .await?
        .and_then(|cm| cm.data)
        .and_then(|mut data| data.remove("ca.crt"))
        .map(String::into_bytes)
        .ok_or_else(|| {
            CertError::Invalid(format!(
                "config map {namespace}/{KUBE_ROOT_CA_CONFIG_MAP} has no ca.crt"
            ))
        })
}

/// Obtain a serving certificate for the webhook FQDN from the cluster signer
pub async fn request_cluster_certificate(
    client: &Client,
    config: &ControllerConfig,
) -> Result<CertMaterial, CertError> {
    let fqdn = config.webhook_fqdn();

    let mut params = CertificateParams::new(vec![fqdn.clone()])?;
    params
        .distinguished_name
        .push(DnType::CommonName, format!("system:node:{fqdn}"));
    params
        .distinguished_name
        .push(DnType::OrganizationName, "system:nodes");
    let key = KeyPair::generate()?;
    let csr_pem = params.serialize_request(&key)?.pem()?;

    let mut cert_pem = None;
    for api_version in CsrApi::PROBE_ORDER {
        match issue(client, api_version, &fqdn, &csr_pem).await {
            Ok(pem) => {
                cert_pem = Some(pem);
                break;
            }
            Err(CertError::Kube(e)) if is_unsupported(&e) => {
                debug!(
                    "Signing request API {} not served: {}",
                    api_version.version(),
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }
    let cert_pem = cert_pem.ok_or(CertError::Unsupported)?;

    Ok(CertMaterial {
        cert_pem,
        key_pem: Zeroizing::new(key.serialize_pem()),
        ca_bundle: cluster_ca_bundle(client, &config.operator_namespace).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csr_with_status(status: Value) -> DynamicObject {
        let mut object = CsrApi::V1.request_object("svc.ns.svc", "csr");
        object.data["status"] = status;
        object
    }

    #[test]
    fn test_probe_order_prefers_v1() {
        assert_eq!(CsrApi::PROBE_ORDER[0], CsrApi::V1);
        let ar = CsrApi::V1Beta1.api_resource();
        assert_eq!(ar.api_version, "certificates.k8s.io/v1beta1");
        assert_eq!(ar.plural, CSR_PLURAL);
    }

    #[test]
    fn test_request_object_carries_signer_and_encoded_request() {
        let object = CsrApi::V1.request_object("svc.ns.svc", "-----BEGIN CERTIFICATE REQUEST-----");
        assert_eq!(object.metadata.name.as_deref(), Some("svc.ns.svc"));
        assert_eq!(object.data["spec"]["signerName"], CSR_SIGNER_NAME);
        let decoded = BASE64
            .decode(object.data["spec"]["request"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, b"-----BEGIN CERTIFICATE REQUEST-----");
    }

    #[test]
    fn test_approval_adds_condition() {
        let approved = approval_body(CsrApi::V1.request_object("svc.ns.svc", "csr"));
        let conditions = approved.data["status"]["conditions"].as_array().unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0]["type"], "Approved");
        assert_eq!(conditions[0]["status"], "True");
        // spec is untouched
        assert_eq!(approved.data["spec"]["signerName"], CSR_SIGNER_NAME);
    }

    #[test]
    fn test_pending_request_has_no_certificate() {
        let object = csr_with_status(json!({"conditions": [{"type": "Approved", "status": "True"}]}));
        assert!(issued_certificate(&object).unwrap().is_none());
    }

    #[test]
    fn test_issued_certificate_is_decoded() {
        let object = csr_with_status(json!({"certificate": BASE64.encode("PEM")}));
        assert_eq!(issued_certificate(&object).unwrap().as_deref(), Some("PEM"));
    }

    #[test]
    fn test_denied_request_is_an_error() {
        let object = csr_with_status(
            json!({"conditions": [{"type": "Denied", "status": "True", "message": "nope"}]}),
        );
        match issued_certificate(&object) {
            Err(CertError::Denied { reason, .. }) => assert_eq!(reason, "nope"),
            other => panic!("expected denial, got {other:?}"),
        }
    }
}
