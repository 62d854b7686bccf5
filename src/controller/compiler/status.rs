//! Per-resource compile outcomes collected during one reconcile pass.

use crate::crd::MonitoringKind;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a monitoring resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: MonitoringKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(kind: MonitoringKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.map(ToString::to_string),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Success or failure per resource.
///
/// A failure is sticky: once a resource has failed, later successes for the
/// same key do not clear it. Messages from several failures are joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusAccumulator {
    outcomes: BTreeMap<ObjectKey, Vec<String>>,
}

impl StatusAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, key: ObjectKey) {
        self.outcomes.entry(key).or_default();
    }

    pub fn record_failure(&mut self, key: ObjectKey, message: impl Into<String>) {
        self.outcomes.entry(key).or_default().push(message.into());
    }

    /// `Ok(())` or the joined failure message for `key`, `None` if never seen
    #[must_use]
    pub fn outcome(&self, key: &ObjectKey) -> Option<Result<(), String>> {
        self.outcomes.get(key).map(|errors| {
            if errors.is_empty() {
                Ok(())
            } else {
                Err(errors.join("; "))
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, Result<(), String>)> {
        self.outcomes.iter().map(|(key, errors)| {
            let outcome = if errors.is_empty() {
                Ok(())
            } else {
                Err(errors.join("; "))
            };
            (key, outcome)
        })
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.outcomes.values().filter(|e| !e.is_empty()).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_sticky_and_joined() {
        let key = ObjectKey::new(MonitoringKind::PodMonitoring, Some("ns"), "a");
        let mut acc = StatusAccumulator::new();
        acc.record_failure(key.clone(), "first");
        acc.record_success(key.clone());
        acc.record_failure(key.clone(), "second");
        assert_eq!(acc.outcome(&key), Some(Err("first; second".to_string())));
        assert_eq!(acc.failure_count(), 1);
    }

    #[test]
    fn test_display() {
        let ns = ObjectKey::new(MonitoringKind::Rules, Some("team"), "alerts");
        let cluster = ObjectKey::new(MonitoringKind::ClusterRules, None, "global");
        assert_eq!(ns.to_string(), "Rules/team/alerts");
        assert_eq!(cluster.to_string(), "ClusterRules/global");
    }
}
