//! # Webhook Certificates
//!
//! Key material for the admission webhook server and publication of its CA
//! bundle into the webhook registrations.
//!
//! Material comes from one of three places:
//!
//! - files given by `TLS_CERT_FILE` / `TLS_KEY_FILE` (and optionally `TLS_CA_FILE`)
//! - a locally generated CA and serving certificate (`TLS_MODE=self-signed`)
//! - a certificate signing request issued by the cluster (`TLS_MODE=cluster-issued`)
//!
//! Material that cannot be decoded is fatal: the webhook server must not
//! start without a usable key pair.

pub mod bundle;
pub mod csr;
pub mod self_signed;

pub use bundle::{inject_ca_bundle, CaBundlePublisher};
pub use csr::{request_cluster_certificate, CsrApi};
pub use self_signed::generate_self_signed;

use crate::config::{ControllerConfig, ServerConfig, TlsMode};
use crate::constants::SELF_SIGNED_VALIDITY_YEARS;
use kube::Client;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("failed to generate certificate: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("invalid certificate material: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no supported certificate signing request API version")]
    Unsupported,

    #[error("certificate signing request {name} was denied: {reason}")]
    Denied { name: String, reason: String },

    #[error("certificate signing request {name} was not issued within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

/// Serving certificate, its private key and the CA bundle clients must trust
#[derive(Clone)]
pub struct CertMaterial {
    pub cert_pem: String,
    pub key_pem: Zeroizing<String>,
    pub ca_bundle: Vec<u8>,
}

impl fmt::Debug for CertMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertMaterial")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .field("ca_bundle_len", &self.ca_bundle.len())
            .finish()
    }
}

impl CertMaterial {
    /// Check that every part decodes
    ///
    /// # Errors
    ///
    /// Returns [`CertError::Invalid`] naming the part that does not.
    pub fn validate(&self) -> Result<(), CertError> {
        parse_certificates(self.cert_pem.as_bytes(), "certificate")?;
        parse_certificates(&self.ca_bundle, "CA bundle")?;

        let key = pem::parse(self.key_pem.as_bytes())
            .map_err(|e| CertError::Invalid(format!("private key: {e}")))?;
        if !key.tag().ends_with("PRIVATE KEY") {
            return Err(CertError::Invalid(format!(
                "private key: unexpected PEM block '{}'",
                key.tag()
            )));
        }
        Ok(())
    }
}

/// Parse every certificate in a PEM bundle, failing if there is none
fn parse_certificates(pem_bytes: &[u8], what: &str) -> Result<usize, CertError> {
    let blocks =
        pem::parse_many(pem_bytes).map_err(|e| CertError::Invalid(format!("{what}: {e}")))?;
    let mut count = 0;
    for block in blocks.iter().filter(|b| b.tag() == "CERTIFICATE") {
        X509Certificate::from_der(block.contents())
            .map_err(|e| CertError::Invalid(format!("{what}: {e}")))?;
        count += 1;
    }
    if count == 0 {
        return Err(CertError::Invalid(format!("{what}: no certificate found")));
    }
    Ok(count)
}

async fn read_file(path: &Path) -> Result<Vec<u8>, CertError> {
    tokio::fs::read(path).await.map_err(|source| CertError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load externally supplied material. Without a CA file the certificate
/// itself is published as the bundle.
pub async fn load_from_files(
    cert_file: &Path,
    key_file: &Path,
    ca_file: Option<&Path>,
) -> Result<CertMaterial, CertError> {
    let cert = read_file(cert_file).await?;
    let key = read_file(key_file).await?;
    let ca_bundle = match ca_file {
        Some(path) => read_file(path).await?,
        None => cert.clone(),
    };

    let material = CertMaterial {
        cert_pem: String::from_utf8(cert)
            .map_err(|e| CertError::Invalid(format!("certificate: {e}")))?,
        key_pem: Zeroizing::new(
            String::from_utf8(key).map_err(|e| CertError::Invalid(format!("private key: {e}")))?,
        ),
        ca_bundle,
    };
    material.validate()?;
    Ok(material)
}

/// Obtain webhook key material according to the server configuration
pub async fn provision(
    client: &Client,
    controller: &ControllerConfig,
    server: &ServerConfig,
) -> Result<CertMaterial, CertError> {
    if let (Some(cert), Some(key)) = (&server.tls_cert_file, &server.tls_key_file) {
        info!("Loading webhook certificate from {}", cert.display());
        return load_from_files(cert, key, server.tls_ca_file.as_deref()).await;
    }

    let fqdn = controller.webhook_fqdn();
    let material = match server.tls_mode {
        TlsMode::SelfSigned => {
            info!("Generating self-signed webhook certificate for {}", fqdn);
            generate_self_signed(&fqdn, SELF_SIGNED_VALIDITY_YEARS)?
        }
        TlsMode::ClusterIssued => {
            info!("Requesting cluster-issued webhook certificate for {}", fqdn);
            request_cluster_certificate(client, controller).await?
        }
    };
    material.validate()?;
    Ok(material)
}
