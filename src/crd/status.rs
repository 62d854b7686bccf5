//! # Monitoring Status
//!
//! Status shared by every monitoring resource: the observed generation and a
//! single `ConfigurationCreateSuccess` condition.

use crate::constants::CONDITION_CONFIGURATION_CREATE_SUCCESS;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a monitoring resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStatus {
    /// Generation the conditions were computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MonitoringStatus {
    /// Current `ConfigurationCreateSuccess` condition, if any
    #[must_use]
    pub fn configuration_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.r#type == CONDITION_CONFIGURATION_CREATE_SUCCESS)
    }

    /// Status after applying one reconcile outcome.
    ///
    /// The transition time is only moved when the condition status flips, so
    /// applying the same outcome twice yields an equal status.
    #[must_use]
    pub fn with_outcome(&self, generation: Option<i64>, outcome: Result<(), &str>) -> Self {
        let (status, reason, message) = match outcome {
            Ok(()) => ("True", "ConfigurationCreated", None),
            Err(msg) => ("False", "ConfigurationFailed", Some(msg.to_string())),
        };

        let last_transition_time = match self.configuration_condition() {
            Some(existing) if existing.status == status => existing.last_transition_time.clone(),
            _ => Some(chrono::Utc::now().to_rfc3339()),
        };

        Self {
            observed_generation: generation,
            conditions: vec![Condition {
                r#type: CONDITION_CONFIGURATION_CREATE_SUCCESS.to_string(),
                status: status.to_string(),
                last_transition_time,
                reason: Some(reason.to_string()),
                message,
            }],
        }
    }
}
