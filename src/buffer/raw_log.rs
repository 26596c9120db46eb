//! Raw Log
//!
//! A log buffer bound to its backing file and the identity of the stream it
//! carries.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::logbuffer::metadata::{LOG_MAGIC, LOG_VERSION};
use crate::logbuffer::{initialise_tails, LogBuffers, LogLayout};

/// Chunk written at a time when reserving storage eagerly
const ALLOCATION_CHUNK: usize = 1024 * 1024;

/// Identity a log buffer's storage is named after
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    pub channel: String,
    pub session_id: i32,
    pub stream_id: i32,
    pub correlation_id: i64,
}

impl std::fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} session={} stream={} correlation={}",
            self.channel, self.session_id, self.stream_id, self.correlation_id
        )
    }
}

/// A mapped log buffer and the file behind it
#[derive(Debug)]
pub struct RawLog {
    identity: StreamIdentity,
    location: PathBuf,
    layout: LogLayout,
    use_sparse_file: bool,
    created: bool,
    buffers: Arc<LogBuffers>,
}

impl RawLog {
    /// Open the log at `location`, creating and allocating it if absent.
    ///
    /// A new log is sized and stamped under a temporary name in the same
    /// directory and only then linked into place, so other openers never see
    /// a partly built file. Losing that race opens the winner's file instead.
    pub(crate) fn map(
        location: PathBuf,
        identity: StreamIdentity,
        layout: LogLayout,
        use_sparse_file: bool,
    ) -> Result<Self> {
        let (buffers, created) = match Self::open_existing(&location, layout)? {
            Some(buffers) => (buffers, false),
            None => Self::create(&location, &identity, layout, use_sparse_file)?,
        };

        tracing::debug!(
            "{} log buffer {:?} for {} (term length {}, sparse={})",
            if created { "Created" } else { "Opened" },
            location,
            identity,
            layout.term_length(),
            use_sparse_file
        );

        Ok(Self {
            identity,
            location,
            layout,
            use_sparse_file,
            created,
            buffers: Arc::new(buffers),
        })
    }

    /// Map and validate the file at `location`, or `None` if there is none
    fn open_existing(location: &Path, layout: LogLayout) -> Result<Option<LogBuffers>> {
        let file = match OpenOptions::new().read(true).write(true).open(location) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(allocation_error(location, e)),
        };
        let buffers = LogBuffers::map_file(&file, location, layout)?;
        Self::validate(buffers, location, layout).map(Some)
    }

    fn create(
        location: &Path,
        identity: &StreamIdentity,
        layout: LogLayout,
        use_sparse_file: bool,
    ) -> Result<(LogBuffers, bool)> {
        let dir = location.parent().unwrap_or_else(|| Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".wolfstream-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| allocation_error(location, e))?;

        // The staging file is removed on drop if anything below fails
        let buffers = Self::allocate(staging.as_file(), location, layout, use_sparse_file)?;
        let buffers = Self::stamp(buffers, identity, location)?;

        match staging.persist_noclobber(location) {
            Ok(_) => Ok((buffers, true)),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                drop(buffers);
                tracing::debug!("Log buffer {:?} created concurrently, opening it", location);
                match Self::open_existing(location, layout)? {
                    Some(buffers) => Ok((buffers, false)),
                    None => Err(allocation_error(
                        location,
                        io::Error::new(io::ErrorKind::NotFound, "log buffer removed while opening"),
                    )),
                }
            }
            Err(e) => Err(allocation_error(location, e.error)),
        }
    }

    fn allocate(file: &File, location: &Path, layout: LogLayout, use_sparse_file: bool) -> Result<LogBuffers> {
        let log_length = layout.log_length();
        if use_sparse_file {
            file.set_len(log_length as u64)
                .map_err(|e| allocation_error(location, e))?;
        } else {
            let zeros = vec![0u8; ALLOCATION_CHUNK.min(log_length)];
            let mut writer = file;
            let mut remaining = log_length;
            while remaining > 0 {
                let chunk = remaining.min(zeros.len());
                writer
                    .write_all(&zeros[..chunk])
                    .map_err(|e| allocation_error(location, e))?;
                remaining -= chunk;
            }
            file.sync_all().map_err(|e| allocation_error(location, e))?;
        }
        LogBuffers::map_file(file, location, layout)
    }

    fn stamp(buffers: LogBuffers, identity: &StreamIdentity, location: &Path) -> Result<LogBuffers> {
        {
            let region = buffers
                .acquire()
                .ok_or_else(|| Error::LogBufferClosed(location.display().to_string()))?;
            let log_meta = region.log_meta_data();
            log_meta.set_stream_identity(identity.session_id, identity.stream_id, identity.correlation_id);
            log_meta.stamp_header(buffers.term_length());
        }
        Ok(buffers)
    }

    fn validate(buffers: LogBuffers, location: &Path, layout: LogLayout) -> Result<LogBuffers> {
        let corrupted = |reason: String| Error::LogBufferCorrupted {
            path: location.to_path_buf(),
            reason,
        };
        {
            let region = buffers
                .acquire()
                .ok_or_else(|| Error::LogBufferClosed(location.display().to_string()))?;
            let log_meta = region.log_meta_data();
            if log_meta.magic() != LOG_MAGIC {
                return Err(corrupted(format!("bad magic {:#x}", log_meta.magic())));
            }
            if log_meta.version() != LOG_VERSION {
                return Err(corrupted(format!("unsupported version {}", log_meta.version())));
            }
            if log_meta.term_length() != layout.term_length() {
                return Err(corrupted(format!(
                    "term length {} does not match expected {}",
                    log_meta.term_length(),
                    layout.term_length()
                )));
            }
        }
        Ok(buffers)
    }

    /// Set the initial term id and mtu and stamp the term tails to match.
    ///
    /// Run once by the creator before any `Publication` attaches; attaching
    /// to a log that skipped this fails.
    pub fn initialise(&self, initial_term_id: i32, mtu_length: usize) -> Result<()> {
        let region = self
            .buffers
            .acquire()
            .ok_or_else(|| Error::LogBufferClosed(self.location.display().to_string()))?;
        initialise_tails(&region, initial_term_id);
        region.log_meta_data().set_mtu_length(mtu_length);
        Ok(())
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn layout(&self) -> LogLayout {
        self.layout
    }

    pub fn term_length(&self) -> usize {
        self.layout.term_length()
    }

    pub fn is_sparse(&self) -> bool {
        self.use_sparse_file
    }

    /// Whether this call created the file rather than opening an existing one
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// Mapped view shared with publications attached to this log
    pub fn log_buffers(&self) -> &Arc<LogBuffers> {
        &self.buffers
    }

    /// Unmap the log, deferred until in-flight holders finish
    pub fn close(&self) -> bool {
        self.buffers.close()
    }

    /// Unmap the log and delete its file
    pub fn delete(&self) -> Result<()> {
        self.buffers.close();
        match std::fs::remove_file(&self.location) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn allocation_error(path: &Path, source: io::Error) -> Error {
    Error::ResourceAllocation {
        path: path.to_path_buf(),
        source,
    }
}
