//! Health check system for monitoring component status.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Kafka consumer component.
pub const KAFKA: &str = "kafka";
/// Blob storage component.
pub const STORAGE: &str = "storage";
/// Recording buffer component.
pub const BUFFER: &str = "buffer";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Component is healthy
    Healthy,
    /// Component is degraded but operational
    Degraded(String),
    /// Component is unhealthy
    Unhealthy(String),
    /// Component status is unknown
    Unknown,
}

impl ComponentStatus {
    /// Label used in HTTP responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded(_) => "degraded",
            ComponentStatus::Unhealthy(_) => "unhealthy",
            ComponentStatus::Unknown => "unknown",
        }
    }

    /// The reason attached to a degraded or unhealthy status.
    pub fn message(&self) -> Option<&str> {
        match self {
            ComponentStatus::Degraded(msg) | ComponentStatus::Unhealthy(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Overall system health status.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// System is unhealthy
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Health check manager for tracking component health.
pub struct HealthCheck {
    components: RwLock<HashMap<String, ComponentStatus>>,
    started_at: Instant,
    consumer_running: RwLock<bool>,
}

impl HealthCheck {
    /// Create a new health check manager.
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
            consumer_running: RwLock::new(false),
        }
    }

    /// Create a health check with the kafka, storage, and buffer
    /// components registered as unknown.
    pub fn for_ingestion() -> Self {
        let health = Self::new();
        for name in [KAFKA, STORAGE, BUFFER] {
            health.register_component(name);
        }
        health
    }

    /// Register a component to track.
    pub fn register_component(&self, name: &str) {
        let mut components = self.components.write();
        components.insert(name.to_string(), ComponentStatus::Unknown);
    }

    /// Mark a component as healthy.
    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    /// Mark a component as degraded.
    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Degraded(reason.to_string()));
    }

    /// Mark a component as unhealthy.
    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Unhealthy(reason.to_string()));
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        let mut components = self.components.write();
        components.insert(name.to_string(), status);
    }

    /// Get the status of a specific component.
    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        let components = self.components.read();
        components.get(name).cloned()
    }

    /// Get all component statuses.
    pub fn get_all_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.components.read().clone()
    }

    /// Worst status across all components. Unknown counts as healthy.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Check if the system is operational (healthy or degraded).
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status(),
            HealthStatus::Healthy | HealthStatus::Degraded
        )
    }

    /// Ready to take traffic: the consumer loop is running and nothing is
    /// unhealthy.
    pub fn is_ready(&self) -> bool {
        self.is_consumer_running() && self.is_operational()
    }

    pub fn consumer_started(&self) {
        *self.consumer_running.write() = true;
    }

    pub fn consumer_stopped(&self) {
        *self.consumer_running.write() = false;
    }

    pub fn is_consumer_running(&self) -> bool {
        *self.consumer_running.read()
    }

    /// Time since this health check was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_lifecycle() {
        let health = HealthCheck::for_ingestion();

        assert_eq!(
            health.get_component_status(KAFKA),
            Some(ComponentStatus::Unknown)
        );

        health.mark_healthy(KAFKA);
        health.mark_healthy(STORAGE);
        health.mark_healthy(BUFFER);
        assert_eq!(health.overall_status(), HealthStatus::Healthy);

        health.mark_degraded(BUFFER, "commit retrying");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        health.mark_unhealthy(STORAGE, "upload failed");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());
    }

    #[test]
    fn test_health_check_default() {
        let health = HealthCheck::default();
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
        assert!(health.is_operational());
        assert!(health.get_all_statuses().is_empty());
    }

    #[test]
    fn test_health_check_unknown_component() {
        let health = HealthCheck::new();
        assert_eq!(health.get_component_status("unknown"), None);
    }

    #[test]
    fn test_for_ingestion_registers_components() {
        let statuses = HealthCheck::for_ingestion().get_all_statuses();
        assert_eq!(statuses.len(), 3);
        for name in [KAFKA, STORAGE, BUFFER] {
            assert_eq!(statuses.get(name), Some(&ComponentStatus::Unknown));
        }
    }

    #[test]
    fn test_readiness_requires_running_consumer() {
        let health = HealthCheck::for_ingestion();
        assert!(!health.is_ready());

        health.consumer_started();
        assert!(health.is_ready());

        health.mark_unhealthy(STORAGE, "down");
        assert!(!health.is_ready());

        health.mark_healthy(STORAGE);
        health.consumer_stopped();
        assert!(!health.is_ready());
    }

    #[test]
    fn test_component_status_transitions() {
        let health = HealthCheck::new();
        health.register_component("test");

        health.mark_degraded("test", "warning");
        assert_eq!(
            health.get_component_status("test"),
            Some(ComponentStatus::Degraded("warning".to_string()))
        );

        health.mark_unhealthy("test", "error");
        assert_eq!(
            health.get_component_status("test"),
            Some(ComponentStatus::Unhealthy("error".to_string()))
        );

        // Recovery
        health.mark_healthy("test");
        assert_eq!(
            health.get_component_status("test"),
            Some(ComponentStatus::Healthy)
        );
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ComponentStatus::Healthy.as_str(), "healthy");
        assert_eq!(ComponentStatus::Unknown.message(), None);
        assert_eq!(
            ComponentStatus::Unhealthy("down".into()).message(),
            Some("down")
        );
        assert_eq!(HealthStatus::Degraded.as_str(), "degraded");
    }
}
