//! ObservationScope for automatic begin/complete logging
//!
//! - Logs `{name}_BEGIN` on creation
//! - Logs `{name}_COMPLETE` on `complete()`
//! - Logs `{name}_FAILED` on `fail()`
//! - Logs `{name}_ERROR` if dropped without either

use std::time::Instant;

use super::logger::{Logger, Severity};

/// A scope that brackets a multi-step operation in the log
///
/// ```ignore
/// let scope = ObservationScope::new("INDEX_RECOVERY");
/// // ... rescan ...
/// scope.complete_with_fields(&[("documents", "12")]);
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    completed: bool,
    fields: Vec<(&'a str, String)>,
    started: Instant,
}

impl<'a> ObservationScope<'a> {
    /// Create a new observation scope; logs `{name}_BEGIN`
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Create a scope whose fields are repeated on every line it logs
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);
        Self {
            name,
            completed: false,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
        }
    }

    fn field_refs(&self) -> Vec<(&str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }

    /// Mark the scope as successfully completed
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Mark the scope as completed, adding extra fields to the line
    pub fn complete_with_fields(mut self, extra_fields: &[(&str, &str)]) {
        self.completed = true;
        let elapsed = self.started.elapsed().as_millis().to_string();
        let mut all = self.field_refs();
        all.extend(extra_fields.iter().copied());
        all.push(("elapsed_ms", elapsed.as_str()));
        Logger::info(&format!("{}_COMPLETE", self.name), &all);
    }

    /// Mark the scope as failed at the given severity
    pub fn fail(mut self, severity: Severity, reason: &str) {
        self.completed = true;
        let mut all = self.field_refs();
        all.push(("reason", reason));
        Logger::log(severity, &format!("{}_FAILED", self.name), &all);
    }

    /// Check if the scope has been completed or failed
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let mut all = self.field_refs();
            all.push(("reason", "scope dropped without completion"));
            Logger::error(&format!("{}_ERROR", self.name), &all);
        }
    }
}
