//! Distinct Error Log
//!
//! Diagnostic sink for failures the core cannot handle itself, such as log
//! buffers that could not be created or mapped. Repeated errors collapse into
//! one observation with a count, so a failure loop cannot flood the log.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One distinct error and how often it has been seen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObservation {
    /// Rendered error, including its source chain
    pub message: String,
    /// Number of times this error was recorded
    pub count: u64,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
}

/// Thread-safe log of distinct errors
#[derive(Debug, Default)]
pub struct DistinctErrorLog {
    observations: Mutex<HashMap<String, ErrorObservation>>,
}

impl DistinctErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. Returns `true` if it had not been seen before.
    pub fn record(&self, error: &(dyn std::error::Error + 'static)) -> bool {
        let message = render(error);
        let now = Utc::now();
        let mut observations = self
            .observations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match observations.get_mut(&message) {
            Some(existing) => {
                existing.count += 1;
                existing.last_observed_at = now;
                false
            }
            None => {
                tracing::error!("{}", message);
                observations.insert(
                    message.clone(),
                    ErrorObservation {
                        message,
                        count: 1,
                        first_observed_at: now,
                        last_observed_at: now,
                    },
                );
                true
            }
        }
    }

    /// Snapshot of all observations, oldest first
    pub fn observations(&self) -> Vec<ErrorObservation> {
        let observations = self
            .observations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut list: Vec<_> = observations.values().cloned().collect();
        list.sort_by_key(|o| o.first_observed_at);
        list
    }

    /// Number of distinct errors recorded
    pub fn distinct_count(&self) -> usize {
        self.observations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn render(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
