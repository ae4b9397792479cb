//! Observability subsystem for the Memory Bank engine
//!
//! - Structured logging (JSON lines)
//! - Typed lifecycle events
//! - Begin/complete scopes for multi-step operations
//! - Per-bank counters
//!
//! Observability is read-only: a failing log sink never fails an operation.

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity, LOG_ENV_VAR};
pub use metrics::{BankMetrics, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log a lifecycle event at its default severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields at its default severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::BankOpen);
        log_event(Event::BankClose);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::WriteCommit, &[("name", "a.md"), ("hash", "sha256:00")]);
    }
}
