//! Atari ST floppy disk image backends.
//!
//! Two formats are supported: plain `.st` raw sector dumps and `.msa`
//! (Magic Shadow Archiver) compressed images. Both decode to the same
//! flat sector layout; the controller only ever sees 512-byte sectors
//! addressed by track/side/sector.
//!
//! The [`DiskImage`] trait is the boundary between image decoding and
//! the drive/controller emulation: sector-level read/write, geometry
//! queries, and re-serialisation for save states.

pub mod msa;
pub mod st;

pub use msa::MsaImage;
pub use st::StImage;

use serde::{Deserialize, Serialize};
use std::fmt;

/// All supported images use 512-byte sectors.
pub const SECTOR_SIZE: usize = 512;

/// Which backend decoded an image. Stored in save states so media can be
/// re-attached with the right serialiser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    St,
    Msa,
}

/// Sector-level access to a floppy disk image.
///
/// Sector numbers are 1-based, matching the ID fields on the medium.
/// Out-of-range requests return `false`/no data rather than panicking;
/// the controller turns them into Record Not Found.
pub trait DiskImage {
    fn kind(&self) -> ImageKind;

    /// Sectors per track. Constant across the whole image for these formats.
    fn sectors_per_track(&self) -> u16;

    /// Number of recorded sides (1 or 2).
    fn sides(&self) -> u8;

    /// Number of tracks per side.
    fn tracks(&self) -> u8;

    /// Copy one sector into `buf` (must hold [`SECTOR_SIZE`] bytes).
    /// Returns `false` if the track/side/sector does not exist.
    fn read_sector(&self, track: u8, side: u8, sector: u8, buf: &mut [u8]) -> bool;

    /// Overwrite one sector. Returns `false` if it does not exist.
    fn write_sector(&mut self, track: u8, side: u8, sector: u8, data: &[u8]) -> bool;

    fn is_write_protected(&self) -> bool;

    fn set_write_protected(&mut self, on: bool);

    /// Serialise back to the on-disk file format.
    fn to_bytes(&self) -> Vec<u8>;
}

/// Errors from image detection and decoding.
#[derive(Debug)]
pub enum ImageError {
    /// Raw dump size doesn't match any known track/side/sector layout.
    UnknownGeometry(usize),
    /// MSA magic word missing.
    BadMsaHeader,
    /// MSA header geometry out of range (sides, track span, sector count).
    BadMsaGeometry,
    /// MSA track data ran out before the declared track span was decoded.
    TruncatedMsaTrack { track: u8, side: u8 },
    /// An RLE run in an MSA track was malformed or overflowed the track.
    BadMsaRun { track: u8, side: u8 },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownGeometry(size) => {
                write!(f, "raw image size {size} does not match any ST disk layout")
            }
            Self::BadMsaHeader => write!(f, "not an MSA image (bad magic)"),
            Self::BadMsaGeometry => write!(f, "MSA header describes an invalid disk geometry"),
            Self::TruncatedMsaTrack { track, side } => {
                write!(f, "MSA image truncated at track {track} side {side}")
            }
            Self::BadMsaRun { track, side } => {
                write!(f, "bad RLE run in MSA track {track} side {side}")
            }
        }
    }
}

impl std::error::Error for ImageError {}

/// Decode an image from raw file bytes, picking the backend by content.
///
/// MSA images are recognised by their magic word; anything else is treated
/// as a raw `.st` dump.
///
/// # Errors
///
/// Returns [`ImageError`] if neither backend accepts the data.
pub fn open_image(data: Vec<u8>) -> Result<Box<dyn DiskImage>, ImageError> {
    if msa::is_msa(&data) {
        Ok(Box::new(MsaImage::from_bytes(&data)?))
    } else {
        Ok(Box::new(StImage::from_bytes(data)?))
    }
}

/// Re-create a backend from snapshot bytes with an explicit kind tag.
///
/// # Errors
///
/// Returns [`ImageError`] if the bytes don't decode under that backend.
pub fn reopen_image(kind: ImageKind, data: Vec<u8>) -> Result<Box<dyn DiskImage>, ImageError> {
    match kind {
        ImageKind::St => Ok(Box::new(StImage::from_bytes(data)?)),
        ImageKind::Msa => Ok(Box::new(MsaImage::from_bytes(&data)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_image_picks_backend_by_content() {
        let st = st::tests_support::blank_image(9, 2, 80);
        let img = open_image(st.to_bytes()).expect("st image");
        assert_eq!(img.kind(), ImageKind::St);

        let msa = msa::tests_support::blank_msa_bytes(9, 2, 80);
        let img = open_image(msa).expect("msa image");
        assert_eq!(img.kind(), ImageKind::Msa);
    }

    #[test]
    fn open_image_rejects_garbage() {
        assert!(open_image(vec![0x12; 1000]).is_err());
    }
}
