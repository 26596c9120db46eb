//! Raw Log Factory
//!
//! Allocates log buffers for network publications, rebuilt network images
//! and same-host publications. Every resource failure is recorded in the
//! distinct error log before it is returned to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::naming::{stream_location, FileMappingConvention};
use super::raw_log::{RawLog, StreamIdentity};
use crate::config::{LogBufferConfig, WolfStreamConfig};
use crate::diagnostics::DistinctErrorLog;
use crate::error::{Error, Result};
use crate::logbuffer::LogLayout;

/// Channel tag used for same-host publications
pub const IPC_CHANNEL: &str = "ipc";

/// Factory for raw logs under one data directory.
///
/// Logs come back stamped with their identity but with uninitialised
/// tails; call `RawLog::initialise` on a created log before publishing.
#[derive(Debug)]
pub struct RawLogFactory {
    convention: FileMappingConvention,
    publication_term_length: usize,
    ipc_publication_term_length: usize,
    images_term_buffer_max_length: usize,
    use_sparse_files: bool,
    error_log: Arc<DistinctErrorLog>,
}

impl RawLogFactory {
    /// Create a factory, ensuring the publications and images directories exist
    pub fn new(
        data_dir: impl Into<PathBuf>,
        config: &LogBufferConfig,
        error_log: Arc<DistinctErrorLog>,
    ) -> Result<Self> {
        config.validate()?;

        let convention = FileMappingConvention::new(data_dir);
        if let Err(e) = convention.ensure_dirs() {
            let err = Error::ResourceAllocation {
                path: convention.data_dir().to_path_buf(),
                source: e,
            };
            error_log.record(&err);
            return Err(err);
        }

        tracing::debug!(
            "Raw log factory ready at {:?} (sparse={})",
            convention.data_dir(),
            config.use_sparse_files
        );

        Ok(Self {
            convention,
            publication_term_length: config.publication_term_buffer_length,
            ipc_publication_term_length: config.ipc_publication_term_buffer_length,
            images_term_buffer_max_length: config.images_term_buffer_max_length,
            use_sparse_files: config.use_sparse_files,
            error_log,
        })
    }

    /// Create a factory from the full configuration
    pub fn from_config(config: &WolfStreamConfig, error_log: Arc<DistinctErrorLog>) -> Result<Self> {
        Self::new(config.data_dir().clone(), &config.buffers, error_log)
    }

    /// Log for a publication sent over the network
    pub fn new_network_publication(
        &self,
        channel: &str,
        session_id: i32,
        stream_id: i32,
        correlation_id: i64,
    ) -> Result<RawLog> {
        let layout = LogLayout::new(self.publication_term_length)?;
        self.new_instance(
            &self.convention.publications_dir(),
            channel,
            session_id,
            stream_id,
            correlation_id,
            layout,
        )
    }

    /// Log for an image rebuilt from a remote publication.
    ///
    /// The term length is dictated by the remote sender and is checked
    /// against the configured maximum before any storage is touched.
    pub fn new_networked_image(
        &self,
        channel: &str,
        session_id: i32,
        stream_id: i32,
        correlation_id: i64,
        term_buffer_length: usize,
    ) -> Result<RawLog> {
        let layout = LogLayout::with_max(term_buffer_length, self.images_term_buffer_max_length)?;
        self.new_instance(
            &self.convention.images_dir(),
            channel,
            session_id,
            stream_id,
            correlation_id,
            layout,
        )
    }

    /// Log for a same-host publication read in place by its subscribers
    pub fn new_direct_publication(&self, session_id: i32, stream_id: i32, correlation_id: i64) -> Result<RawLog> {
        let layout = LogLayout::new(self.ipc_publication_term_length)?;
        self.new_instance(
            &self.convention.publications_dir(),
            IPC_CHANNEL,
            session_id,
            stream_id,
            correlation_id,
            layout,
        )
    }

    fn new_instance(
        &self,
        root: &Path,
        channel: &str,
        session_id: i32,
        stream_id: i32,
        correlation_id: i64,
        layout: LogLayout,
    ) -> Result<RawLog> {
        let location = stream_location(root, channel, session_id, stream_id, correlation_id);
        let identity = StreamIdentity {
            channel: channel.to_string(),
            session_id,
            stream_id,
            correlation_id,
        };

        RawLog::map(location, identity, layout, self.use_sparse_files).map_err(|e| {
            self.error_log.record(&e);
            e
        })
    }

    pub fn publications_dir(&self) -> PathBuf {
        self.convention.publications_dir()
    }

    pub fn images_dir(&self) -> PathBuf {
        self.convention.images_dir()
    }

    pub fn use_sparse_files(&self) -> bool {
        self.use_sparse_files
    }

    pub fn error_log(&self) -> &Arc<DistinctErrorLog> {
        &self.error_log
    }
}
