//! Raw `.st` sector dump backend.
//!
//! An ST image is the bare concatenation of every sector in track order:
//! track 0 side 0, track 0 side 1, track 1 side 0, and so on. Geometry is
//! not stored in the file beyond what the boot sector's BIOS parameter
//! block declares, so it is recovered from the boot sector when that looks
//! sane and from the file size otherwise.

use crate::{DiskImage, ImageError, ImageKind, SECTOR_SIZE};

/// Raw sector dump with derived geometry.
pub struct StImage {
    data: Vec<u8>,
    sectors_per_track: u16,
    sides: u8,
    tracks: u8,
    write_protected: bool,
}

impl StImage {
    /// Decode a raw dump, recovering the geometry.
    ///
    /// # Errors
    ///
    /// [`ImageError::UnknownGeometry`] if neither the boot sector nor the
    /// file size yields a consistent layout.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        let (sectors_per_track, sides, tracks) =
            detect_geometry(&data).ok_or(ImageError::UnknownGeometry(data.len()))?;
        Ok(Self {
            data,
            sectors_per_track,
            sides,
            tracks,
            write_protected: false,
        })
    }

    /// Build a blank, zero-filled image with the given geometry.
    pub fn blank(sectors_per_track: u16, sides: u8, tracks: u8) -> Self {
        let size = sectors_per_track as usize * sides as usize * tracks as usize * SECTOR_SIZE;
        Self {
            data: vec![0; size],
            sectors_per_track,
            sides,
            tracks,
            write_protected: false,
        }
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

impl DiskImage for StImage {
    fn kind(&self) -> ImageKind {
        ImageKind::St
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
        self.data.clone()
    }
}

/// Recover (sectors/track, sides, tracks) for a raw dump.
///
/// The boot sector's BPB is tried first: sectors/track at offset 24 and
/// side count at offset 26, both little-endian words. If those values are
/// plausible and consistent with the file size they win; otherwise the
/// size is matched against the usual ST layouts.
fn detect_geometry(data: &[u8]) -> Option<(u16, u8, u8)> {
    if data.is_empty() || data.len() % SECTOR_SIZE != 0 {
        return None;
    }
    let total_sectors = data.len() / SECTOR_SIZE;

    if data.len() >= SECTOR_SIZE {
        let spt = u16::from_le_bytes([data[24], data[25]]);
        let sides = u16::from_le_bytes([data[26], data[27]]);
        if (8..=44).contains(&spt) && (1..=2).contains(&sides) {
            let per_cylinder = spt as usize * sides as usize;
            if per_cylinder > 0 && total_sectors % per_cylinder == 0 {
                let tracks = total_sectors / per_cylinder;
                if (1..=90).contains(&tracks) {
                    return Some((spt, sides as u8, tracks as u8));
                }
            }
        }
    }

    // No usable BPB: match the size against common layouts. Track counts
    // 76..=86 cover both plain and "extra tracks" dumps.
    for sides in [2u8, 1] {
        for spt in [9u16, 10, 11, 18, 21, 36, 40] {
            let per_cylinder = spt as usize * sides as usize;
            if total_sectors % per_cylinder != 0 {
                continue;
            }
            let tracks = total_sectors / per_cylinder;
            if (76..=86).contains(&tracks) {
                return Some((spt, sides, tracks as u8));
            }
        }
    }
    None
}

#[doc(hidden)]
pub mod tests_support {
    use super::StImage;

    /// Blank image helper shared by unit and integration tests.
    pub fn blank_image(spt: u16, sides: u8, tracks: u8) -> StImage {
        StImage::blank(spt, sides, tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_720k_from_size() {
        let data = vec![0u8; 9 * 2 * 80 * SECTOR_SIZE];
        assert_eq!(detect_geometry(&data), Some((9, 2, 80)));
    }

    #[test]
    fn detect_360k_single_sided() {
        let data = vec![0u8; 9 * 80 * SECTOR_SIZE];
        // Ambiguous sizes prefer double-sided; 360k only divides as 1-sided.
        assert_eq!(detect_geometry(&data), Some((9, 1, 80)));
    }

    #[test]
    fn boot_sector_geometry_wins() {
        // 800k image: 10 sectors, 2 sides, 80 tracks declared in the BPB.
        let mut data = vec![0u8; 10 * 2 * 80 * SECTOR_SIZE];
        data[24] = 10;
        data[26] = 2;
        assert_eq!(detect_geometry(&data), Some((10, 2, 80)));
    }

    #[test]
    fn bogus_boot_sector_falls_back_to_size() {
        let mut data = vec![0u8; 9 * 2 * 80 * SECTOR_SIZE];
        data[24] = 0xFF; // Not a sane sector count
        data[25] = 0xFF;
        assert_eq!(detect_geometry(&data), Some((9, 2, 80)));
    }

    #[test]
    fn reject_odd_sizes() {
        assert_eq!(detect_geometry(&vec![0u8; 12345]), None);
        assert_eq!(detect_geometry(&[]), None);
    }

    #[test]
    fn sector_round_trip() {
        let mut img = StImage::blank(9, 2, 80);
        let data: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i & 0xFF) as u8).collect();
        assert!(img.write_sector(40, 1, 5, &data));
        let mut back = [0u8; SECTOR_SIZE];
        assert!(img.read_sector(40, 1, 5, &mut back));
        assert_eq!(&back[..], &data[..]);
    }

    #[test]
    fn out_of_range_sector_rejected() {
        let img = StImage::blank(9, 2, 80);
        let mut buf = [0u8; SECTOR_SIZE];
        assert!(!img.read_sector(0, 0, 0, &mut buf)); // Sectors are 1-based
        assert!(!img.read_sector(0, 0, 10, &mut buf));
        assert!(!img.read_sector(80, 0, 1, &mut buf));
        assert!(!img.read_sector(0, 2, 1, &mut buf));
    }

    #[test]
    fn offset_layout() {
        let img = StImage::blank(9, 2, 80);
        assert_eq!(img.offset(0, 0, 1), Some(0));
        assert_eq!(img.offset(0, 1, 1), Some(9 * SECTOR_SIZE));
        assert_eq!(img.offset(1, 0, 1), Some(18 * SECTOR_SIZE));
        assert_eq!(img.offset(1, 0, 4), Some(21 * SECTOR_SIZE));
    }

    #[test]
    fn to_bytes_is_raw_dump() {
        let mut img = StImage::blank(9, 1, 80);
        img.write_sector(0, 0, 1, &[0xA5; SECTOR_SIZE]);
        let bytes = img.to_bytes();
        assert_eq!(bytes.len(), 9 * 80 * SECTOR_SIZE);
        assert_eq!(bytes[0], 0xA5);
    }
}
