//! Publication Conductor
//!
//! The control-plane collaborator a publication reports to. It decides
//! whether a publication counts as connected and is told when the last
//! reference to a publication is released.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use super::handle::Publication;
use crate::config::WolfStreamConfig;

/// Collaborator notified of publication lifecycle events
pub trait PublicationConductor: Send + Sync {
    /// Whether a subscriber is live, given the last status message time in
    /// epoch milliseconds (zero when none has arrived)
    fn is_publication_connected(&self, time_of_last_status_message_ms: i64) -> bool;

    /// Called exactly once, when the publication's reference count reaches zero
    fn release_publication(&self, publication: &Publication);
}

/// In-process conductor driven by wall-clock status message timeouts
#[derive(Debug)]
pub struct LocalConductor {
    connection_timeout: Duration,
    released: Mutex<Vec<i64>>,
}

impl LocalConductor {
    pub fn new(connection_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &WolfStreamConfig) -> Self {
        Self::new(config.publication_connection_timeout())
    }

    /// Registration ids of publications released so far, in release order
    pub fn released(&self) -> Vec<i64> {
        self.released
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl PublicationConductor for LocalConductor {
    fn is_publication_connected(&self, time_of_last_status_message_ms: i64) -> bool {
        if time_of_last_status_message_ms <= 0 {
            return false;
        }
        let elapsed_ms = Utc::now().timestamp_millis() - time_of_last_status_message_ms;
        elapsed_ms <= self.connection_timeout.as_millis() as i64
    }

    fn release_publication(&self, publication: &Publication) {
        tracing::debug!(
            "Released publication {} on {} (session {}, stream {})",
            publication.registration_id(),
            publication.channel(),
            publication.session_id(),
            publication.stream_id()
        );
        self.released
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(publication.registration_id());
    }
}
