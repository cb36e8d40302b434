//! Failure conditions for objects a controller gave up on.

use crate::cluster::ObjectKey;
use dashmap::DashMap;
use std::fmt;

/// FailureCondition records the last permanent error of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCondition {
    pub controller: String,
    pub key: ObjectKey,
    pub message: String,
    /// Consecutive permanent failures since the last success.
    pub count: u32,
}

impl fmt::Display for FailureCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.controller, self.key, self.message)?;
        if self.count > 1 {
            write!(f, " (x{})", self.count)?;
        }
        Ok(())
    }
}

/// Conditions is shared by every controller of an engine.
#[derive(Debug, Default)]
pub struct Conditions {
    failures: DashMap<(String, ObjectKey), FailureCondition>,
}

impl Conditions {
    pub fn new() -> Self {
        Conditions::default()
    }

    pub fn record(&self, controller: &str, key: &ObjectKey, message: impl Into<String>) {
        let message = message.into();
        self.failures
            .entry((controller.to_string(), key.clone()))
            .and_modify(|c| {
                c.message = message.clone();
                c.count = c.count.saturating_add(1);
            })
            .or_insert_with(|| FailureCondition {
                controller: controller.to_string(),
                key: key.clone(),
                message,
                count: 1,
            });
    }

    pub fn clear(&self, controller: &str, key: &ObjectKey) {
        self.failures.remove(&(controller.to_string(), key.clone()));
    }

    pub fn get(&self, controller: &str, key: &ObjectKey) -> Option<FailureCondition> {
        self.failures
            .get(&(controller.to_string(), key.clone()))
            .map(|c| c.value().clone())
    }

    /// All current conditions, sorted by controller then key.
    pub fn snapshot(&self) -> Vec<FailureCondition> {
        let mut all: Vec<_> = self.failures.iter().map(|c| c.value().clone()).collect();
        all.sort_by(|a, b| (&a.controller, &a.key).cmp(&(&b.controller, &b.key)));
        all
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}
