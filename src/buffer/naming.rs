//! File Mapping Convention
//!
//! Where log buffers live on disk. The location of a stream's storage is a
//! pure function of its identity, so a second process opening the same
//! identity maps the same file.

use std::path::{Path, PathBuf};

/// Subdirectory holding publication logs
pub const PUBLICATIONS: &str = "publications";

/// Subdirectory holding rebuilt network images
pub const IMAGES: &str = "images";

/// Suffix of every log buffer file
pub const LOG_FILE_SUFFIX: &str = ".logbuffer";

/// Longest escaped channel prefix kept in a file name
const MAX_CHANNEL_PREFIX: usize = 64;

/// Directory structure under a data directory
#[derive(Debug, Clone)]
pub struct FileMappingConvention {
    data_dir: PathBuf,
}

impl FileMappingConvention {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn publications_dir(&self) -> PathBuf {
        self.data_dir.join(PUBLICATIONS)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join(IMAGES)
    }

    /// Ensure the publications and images directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.publications_dir())?;
        std::fs::create_dir_all(self.images_dir())
    }
}

/// Storage location for one stream under `root`.
///
/// The channel is escaped into something safe for a file name and followed
/// by a checksum of the raw channel, so channels that escape alike stay apart.
pub fn stream_location(
    root: &Path,
    channel: &str,
    session_id: i32,
    stream_id: i32,
    correlation_id: i64,
) -> PathBuf {
    let file_name = format!(
        "{}-{:08x}-{:08x}-{:08x}-{:016x}{}",
        escape_channel(channel),
        crc32fast::hash(channel.as_bytes()),
        session_id as u32,
        stream_id as u32,
        correlation_id as u64,
        LOG_FILE_SUFFIX
    );
    root.join(file_name)
}

fn escape_channel(channel: &str) -> String {
    channel
        .chars()
        .take(MAX_CHANNEL_PREFIX)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}
