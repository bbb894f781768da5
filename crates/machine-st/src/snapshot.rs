//! Save-state support.
//!
//! The whole disk subsystem serialises into one opaque blob: the
//! controller aggregate (registers, DMA engine, drives, work buffer,
//! timer deadline, PRNG stream) plus the media bytes per drive, tagged
//! with their backend so restore can rebuild the right decoder. Restore
//! needs no fix-up pass; a restored machine continues mid-command.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};

use format_st::{ImageError, ImageKind};
use wd_1772::{Fdc, MAX_DRIVES};

use crate::StMachine;

#[derive(Debug)]
pub enum SnapshotError {
    Encode(String),
    Decode(String),
    Media(ImageError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "snapshot encode failed: {e}"),
            Self::Decode(e) => write!(f, "snapshot decode failed: {e}"),
            Self::Media(e) => write!(f, "snapshot media rebuild failed: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Media bytes plus the backend that produced them.
#[derive(Serialize, Deserialize)]
struct MediaRecord {
    kind: ImageKind,
    data: String,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    cycles: u64,
    io_porta: u8,
    fdc: &'a Fdc,
    media: Vec<Option<MediaRecord>>,
}

#[derive(Deserialize)]
struct SnapshotOwned {
    cycles: u64,
    io_porta: u8,
    fdc: Fdc,
    media: Vec<Option<MediaRecord>>,
}

impl StMachine {
    /// Capture the disk subsystem as an opaque blob.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Encode`] if serialisation fails.
    pub fn save_state(&self) -> Result<Vec<u8>, SnapshotError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let media = (0..MAX_DRIVES)
            .map(|d| {
                self.fdc.media(d).map(|image| MediaRecord {
                    kind: image.kind(),
                    data: engine.encode(image.to_bytes()),
                })
            })
            .collect();

        let snapshot = SnapshotRef {
            cycles: self.cycles,
            io_porta: self.io_porta,
            fdc: &self.fdc,
            media,
        };
        serde_json::to_vec(&snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    /// Restore a blob produced by [`Self::save_state`]. RAM contents are
    /// not part of the blob; the embedding emulator snapshots memory
    /// itself.
    ///
    /// # Errors
    ///
    /// [`SnapshotError`] if the blob or the embedded media fail to
    /// decode.
    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let snapshot: SnapshotOwned =
            serde_json::from_slice(bytes).map_err(|e| SnapshotError::Decode(e.to_string()))?;

        let engine = base64::engine::general_purpose::STANDARD;
        self.cycles = snapshot.cycles;
        self.io_porta = snapshot.io_porta;
        self.fdc = snapshot.fdc;

        for (drive, record) in snapshot.media.into_iter().enumerate() {
            if drive >= MAX_DRIVES {
                break;
            }
            if let Some(record) = record {
                let data = engine
                    .decode(record.data)
                    .map_err(|e| SnapshotError::Decode(e.to_string()))?;
                let image =
                    format_st::reopen_image(record.kind, data).map_err(SnapshotError::Media)?;
                self.fdc.restore_media(drive, image);
            }
        }
        Ok(())
    }
}
