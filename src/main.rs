//! # Monitoring Operator
//!
//! Kubernetes operator that compiles `PodMonitoring`, `ClusterPodMonitoring`,
//! `Rules`, `ClusterRules` and the `OperatorConfig` singleton into collector,
//! rule-evaluator and Alertmanager configuration.
//!
//! ## Overview
//!
//! 1. **Watches** monitoring resources, the managed workloads and referenced secrets
//! 2. **Compiles** scrape jobs, alerting configuration and rule files
//! 3. **Applies** generated config maps and secrets and patches workload flags
//! 4. **Admits** monitoring resources through validating and defaulting webhooks
//!
//! ## Usage
//!
//! Configuration is read from the environment, see [`monitoring_operator::config`].

use anyhow::Result;
use monitoring_operator::runtime::{initialize, run};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run(init).await
}
