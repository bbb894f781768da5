//! MSA (Magic Shadow Archiver) backend.
//!
//! An MSA file is a per-track RLE compression of the same flat sector
//! layout as a raw `.st` dump. All header words are big-endian:
//!
//! ```text
//! +0  magic          $0E0F
//! +2  sectors/track
//! +4  sides - 1
//! +6  starting track (always 0 here)
//! +8  ending track
//! ```
//!
//! Each track (side 0 then side 1 per track) follows as a big-endian
//! length word and that many data bytes. A track whose length equals the
//! raw track size is stored uncompressed; otherwise `$E5 byte count.w`
//! expands to `count` repeats of `byte`, and every other byte is literal.

use crate::{DiskImage, ImageError, ImageKind, SECTOR_SIZE};

const MSA_MAGIC: u16 = 0x0E0F;
const RLE_MARKER: u8 = 0xE5;

/// Runs shorter than this are left literal when compressing; a run entry
/// costs 4 bytes.
const MIN_RUN: usize = 4;

/// MSA image decoded to the flat sector layout.
pub struct MsaImage {
    data: Vec<u8>,
    sectors_per_track: u16,
    sides: u8,
    tracks: u8,
    write_protected: bool,
}

/// Check for the MSA magic word.
pub fn is_msa(data: &[u8]) -> bool {
    data.len() >= 2 && u16::from_be_bytes([data[0], data[1]]) == MSA_MAGIC
}

impl MsaImage {
    /// Decode an MSA file.
    ///
    /// # Errors
    ///
    /// [`ImageError`] variants for a missing magic, implausible geometry,
    /// truncated track data, or a malformed RLE run.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        if data.len() < 10 || !is_msa(data) {
            return Err(ImageError::BadMsaHeader);
        }
        let sectors_per_track = u16::from_be_bytes([data[2], data[3]]);
        let sides = u16::from_be_bytes([data[4], data[5]]) + 1;
        let start_track = u16::from_be_bytes([data[6], data[7]]);
        let end_track = u16::from_be_bytes([data[8], data[9]]);

        if !(1..=44).contains(&sectors_per_track)
            || !(1..=2).contains(&sides)
            || start_track != 0
            || !(1..=90).contains(&(end_track + 1))
        {
            return Err(ImageError::BadMsaGeometry);
        }

        let tracks = (end_track + 1) as u8;
        let sides = sides as u8;
        let track_len = sectors_per_track as usize * SECTOR_SIZE;
        let mut image = vec![0u8; track_len * sides as usize * tracks as usize];
        let mut pos = 10;

        for track in 0..tracks {
            for side in 0..sides {
                if pos + 2 > data.len() {
                    return Err(ImageError::TruncatedMsaTrack { track, side });
                }
                let stored = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
                pos += 2;
                if pos + stored > data.len() {
                    return Err(ImageError::TruncatedMsaTrack { track, side });
                }
                let src = &data[pos..pos + stored];
                pos += stored;

                let dst_start = (track as usize * sides as usize + side as usize) * track_len;
                let dst = &mut image[dst_start..dst_start + track_len];
                if stored == track_len {
                    dst.copy_from_slice(src);
                } else {
                    expand_track(src, dst).map_err(|()| ImageError::BadMsaRun { track, side })?;
                }
            }
        }

        Ok(Self {
            data: image,
            sectors_per_track,
            sides,
            tracks,
            write_protected: false,
        })
    }

    fn offset(&self, track: u8, side: u8, sector: u8) -> Option<usize> {
        if track >= self.tracks
            || side >= self.sides
            || sector == 0
            || u16::from(sector) > self.sectors_per_track
        {
            return None;
        }
        let index = (track as usize * self.sides as usize + side as usize)
            * self.sectors_per_track as usize
            + (sector as usize - 1);
        Some(index * SECTOR_SIZE)
    }
}

impl DiskImage for MsaImage {
    fn kind(&self) -> ImageKind {
        ImageKind::Msa
    }

    fn sectors_per_track(&self) -> u16 {
        self.sectors_per_track
    }

    fn sides(&self) -> u8 {
        self.sides
    }

    fn tracks(&self) -> u8 {
        self.tracks
    }

    fn read_sector(&self, track: u8, side: u8, sector: u8, buf: &mut [u8]) -> bool {
        match self.offset(track, side, sector) {
            Some(start) => {
                buf[..SECTOR_SIZE].copy_from_slice(&self.data[start..start + SECTOR_SIZE]);
                true
            }
            None => false,
        }
    }

    fn write_sector(&mut self, track: u8, side: u8, sector: u8, data: &[u8]) -> bool {
        match self.offset(track, side, sector) {
            Some(start) => {
                self.data[start..start + SECTOR_SIZE].copy_from_slice(&data[..SECTOR_SIZE]);
                true
            }
            None => false,
        }
    }

    fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    fn set_write_protected(&mut self, on: bool) {
        self.write_protected = on;
    }

    fn to_bytes(&self) -> Vec<u8> {
        let track_len = self.sectors_per_track as usize * SECTOR_SIZE;
        let mut out = Vec::with_capacity(10 + self.data.len() / 2);
        out.extend_from_slice(&MSA_MAGIC.to_be_bytes());
        out.extend_from_slice(&self.sectors_per_track.to_be_bytes());
        out.extend_from_slice(&u16::from(self.sides - 1).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&u16::from(self.tracks - 1).to_be_bytes());

        for chunk in self.data.chunks_exact(track_len) {
            let packed = compress_track(chunk);
            if packed.len() < track_len {
                out.extend_from_slice(&(packed.len() as u16).to_be_bytes());
                out.extend_from_slice(&packed);
            } else {
                out.extend_from_slice(&(track_len as u16).to_be_bytes());
                out.extend_from_slice(chunk);
            }
        }
        out
    }
}

fn expand_track(src: &[u8], dst: &mut [u8]) -> Result<(), ()> {
    let mut read = 0;
    let mut write = 0;
    while read < src.len() {
        if src[read] == RLE_MARKER {
            if read + 4 > src.len() {
                return Err(());
            }
            let byte = src[read + 1];
            let count = u16::from_be_bytes([src[read + 2], src[read + 3]]) as usize;
            read += 4;
            if write + count > dst.len() {
                return Err(());
            }
            dst[write..write + count].fill(byte);
            write += count;
        } else {
            if write >= dst.len() {
                return Err(());
            }
            dst[write] = src[read];
            read += 1;
            write += 1;
        }
    }
    if write == dst.len() {
        Ok(())
    } else {
        Err(())
    }
}

fn compress_track(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let byte = src[i];
        let mut run = 1;
        while i + run < src.len() && src[i + run] == byte && run < u16::MAX as usize {
            run += 1;
        }
        // The marker byte can never be emitted literally.
        if run >= MIN_RUN || byte == RLE_MARKER {
            out.push(RLE_MARKER);
            out.push(byte);
            out.extend_from_slice(&(run as u16).to_be_bytes());
        } else {
            for _ in 0..run {
                out.push(byte);
            }
        }
        i += run;
    }
    out
}

#[doc(hidden)]
pub mod tests_support {
    use super::{MsaImage, DiskImage};
    use crate::st::tests_support::blank_image;

    /// Encoded blank MSA bytes for detection tests.
    pub fn blank_msa_bytes(spt: u16, sides: u8, tracks: u8) -> Vec<u8> {
        let raw = blank_image(spt, sides, tracks).to_bytes();
        let img = MsaImage {
            data: raw,
            sectors_per_track: spt,
            sides,
            tracks,
            write_protected: false,
        };
        img.to_bytes()
    }
}
