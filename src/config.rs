//! Transfer tunables.
//!
//! [`TransferConfig`] plays the role `PackOptions` plays for archive
//! creation: one plain struct with sensible defaults, filled from CLI flags
//! and validated once before any I/O happens.

use std::time::Duration;

use thiserror::Error;

use crate::codec::GROUP_CHARS;

/// Encoded characters stored per record, excluding the reserved marker.
pub const DEFAULT_CHARS_PER_RECORD:      usize = 49_500;
/// Records per container (`A1:A1000` on a spreadsheet).
pub const DEFAULT_RECORDS_PER_CONTAINER: usize = 1_000;
pub const DEFAULT_UPLOAD_WORKERS:        usize = 10;
pub const DEFAULT_DOWNLOAD_WORKERS:      usize = 11;
pub const DEFAULT_POLL_INTERVAL:         Duration = Duration::from_millis(100);
/// Encoded characters decoded per step on the download path: 4 MiB.
pub const DEFAULT_DECODE_BLOCK_CHARS:    usize = 4 * 1024 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },
    #[error("container capacity {capacity} is not a multiple of 4 characters")]
    UnalignedCapacity { capacity: usize },
    #[error("decode block of {0} characters is not a multiple of 4")]
    UnalignedDecodeBlock(usize),
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub chars_per_record:      usize,
    pub records_per_container: usize,
    pub upload_workers:        usize,
    pub download_workers:      usize,
    /// How long the progress coordinator waits for a report before
    /// re-checking worker liveness.
    pub poll_interval:         Duration,
    pub decode_block_chars:    usize,
    pub show_progress:         bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chars_per_record:      DEFAULT_CHARS_PER_RECORD,
            records_per_container: DEFAULT_RECORDS_PER_CONTAINER,
            upload_workers:        DEFAULT_UPLOAD_WORKERS,
            download_workers:      DEFAULT_DOWNLOAD_WORKERS,
            poll_interval:         DEFAULT_POLL_INTERVAL,
            decode_block_chars:    DEFAULT_DECODE_BLOCK_CHARS,
            show_progress:         true,
        }
    }
}

impl TransferConfig {
    /// Total encoded characters one container holds.
    pub fn container_capacity(&self) -> usize {
        self.chars_per_record * self.records_per_container
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("chars_per_record", self.chars_per_record),
            ("records_per_container", self.records_per_container),
            ("upload_workers", self.upload_workers),
            ("download_workers", self.download_workers),
            ("decode_block_chars", self.decode_block_chars),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        let capacity = self.container_capacity();
        if capacity % GROUP_CHARS != 0 {
            return Err(ConfigError::UnalignedCapacity { capacity });
        }
        if self.decode_block_chars % GROUP_CHARS != 0 {
            return Err(ConfigError::UnalignedDecodeBlock(self.decode_block_chars));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.container_capacity(), 49_500_000);
    }

    #[test]
    fn rejects_zero_workers() {
        let cfg = TransferConfig { upload_workers: 0, ..TransferConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero { field: "upload_workers" }));
    }

    #[test]
    fn rejects_unaligned_capacity() {
        let cfg = TransferConfig {
            chars_per_record:      7,
            records_per_container: 3,
            ..TransferConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::UnalignedCapacity { capacity: 21 }));
    }

    #[test]
    fn rejects_unaligned_decode_block() {
        let cfg = TransferConfig { decode_block_chars: 10, ..TransferConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::UnalignedDecodeBlock(10)));
    }
}
