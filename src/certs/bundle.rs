//! CA bundle publication
//!
//! The validating and mutating webhook registrations are installed with the
//! deployment manifests and carry the operator's deterministic name. Their
//! `caBundle` fields are kept pointing at the operator's CA. A registration
//! that does not exist yet is skipped until a later round.

use crate::observability::metrics;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::ByteString;
use kube::api::PostParams;
use kube::{Api, Client};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Set `bundle` on every client config; true if any value changed
pub fn inject_ca_bundle<'a>(
    configs: impl IntoIterator<Item = &'a mut WebhookClientConfig>,
    bundle: &[u8],
) -> bool {
    let mut changed = false;
    for config in configs {
        if config.ca_bundle.as_ref().map(|b| b.0.as_slice()) != Some(bundle) {
            config.ca_bundle = Some(ByteString(bundle.to_vec()));
            changed = true;
        }
    }
    changed
}

/// Periodically writes the CA bundle into the webhook registrations
#[derive(Clone)]
pub struct CaBundlePublisher {
    client: Client,
    name: String,
    bundle: Vec<u8>,
    interval: Duration,
}

impl std::fmt::Debug for CaBundlePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaBundlePublisher")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl CaBundlePublisher {
    #[must_use]
    pub fn new(client: Client, name: String, bundle: Vec<u8>, interval: Duration) -> Self {
        Self {
            client,
            name,
            bundle,
            interval,
        }
    }

    async fn publish_validating(&self) -> Result<bool, kube::Error> {
        let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
        let Some(mut registration) = api.get_opt(&self.name).await? else {
            debug!("ValidatingWebhookConfiguration {} not found, skipping", self.name);
            return Ok(false);
        };
        let configs = registration
            .webhooks
            .iter_mut()
            .flatten()
            .map(|w| &mut w.client_config);
        if !inject_ca_bundle(configs, &self.bundle) {
            return Ok(false);
        }
        api.replace(&self.name, &PostParams::default(), &registration)
            .await?;
        Ok(true)
    }

    async fn publish_mutating(&self) -> Result<bool, kube::Error> {
        let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        let Some(mut registration) = api.get_opt(&self.name).await? else {
            debug!("MutatingWebhookConfiguration {} not found, skipping", self.name);
            return Ok(false);
        };
        let configs = registration
            .webhooks
            .iter_mut()
            .flatten()
            .map(|w| &mut w.client_config);
        if !inject_ca_bundle(configs, &self.bundle) {
            return Ok(false);
        }
        api.replace(&self.name, &PostParams::default(), &registration)
            .await?;
        Ok(true)
    }

    /// One publication round over both registrations
    pub async fn publish_once(&self) -> Result<(), kube::Error> {
        let validating = self.publish_validating().await;
        let mutating = self.publish_mutating().await;

        for updated in [&validating, &mutating].into_iter().flatten() {
            if *updated {
                info!("Published CA bundle to webhook configuration {}", self.name);
            }
        }
        validating?;
        mutating?;
        metrics::increment_ca_bundle_publications();
        Ok(())
    }

    /// Publish immediately and then every interval until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.publish_once().await {
                metrics::increment_ca_bundle_publication_errors();
                warn!(error = %e, "Failed to publish CA bundle to {}", self.name);
            }
        }
        debug!("CA bundle publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_config(bundle: Option<&[u8]>) -> WebhookClientConfig {
        WebhookClientConfig {
            ca_bundle: bundle.map(|b| ByteString(b.to_vec())),
            ..Default::default()
        }
    }

    #[test]
    fn test_inject_sets_missing_bundle() {
        let mut configs = vec![client_config(None), client_config(Some(b"old"))];
        assert!(inject_ca_bundle(configs.iter_mut(), b"new"));
        for config in &configs {
            assert_eq!(config.ca_bundle.as_ref().unwrap().0, b"new");
        }
    }

    #[test]
    fn test_inject_is_idempotent() {
        let mut configs = vec![client_config(Some(b"ca"))];
        assert!(!inject_ca_bundle(configs.iter_mut(), b"ca"));
        assert!(!inject_ca_bundle(configs.iter_mut(), b"ca"));
    }

    #[test]
    fn test_inject_without_webhooks_changes_nothing() {
        let mut configs: Vec<WebhookClientConfig> = Vec::new();
        assert!(!inject_ca_bundle(configs.iter_mut(), b"ca"));
    }
}
