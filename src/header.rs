//! NSF v1 header parsing.
//!
//! The first 128 bytes of every `.nsf` file are a fixed-layout record
//! describing the song count, entry points, and bank-switch init vector.
//! [`Header::parse`] is pure: it borrows the header bytes, never the file
//! handle, and performs no I/O of its own.

use bitflags::bitflags;

use crate::error::Error;

/// Size of the fixed NSF v1 header in bytes.
pub const NSF_HEADER_LEN: usize = 128;

const MAGIC: [u8; 5] = [0x4E, 0x45, 0x53, 0x4D, 0x1A];

/// Maximum number of characters kept in the [`Header::name`] /
/// [`Header::artist`] / [`Header::copyright`] convenience accessors.
///
/// The raw 32-byte fields are always retained verbatim (see
/// [`Header::name_raw`] and friends) so re-encoding stays bit-identical;
/// this constant only bounds the friendlier `String` views.
const TEXT_FIELD_DISPLAY_LEN: usize = 31;

bitflags! {
    /// Region flags at header offset 122.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegionFlags: u8 {
        const PAL      = 0b0000_0001;
        const DUAL     = 0b0000_0010;
        const RESERVED = 0b1111_1100;
    }
}

bitflags! {
    /// Extra-chip flags at header offset 123.
    ///
    /// These registers are never emulated by this engine (see the crate's
    /// Non-goals); the flags are parsed only so callers can surface which
    /// expansion audio a song expects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExtraChips: u8 {
        const VRC6      = 0b0000_0001;
        const VRC7      = 0b0000_0010;
        const FDS       = 0b0000_0100;
        const MMC5      = 0b0000_1000;
        const N163      = 0b0001_0000;
        const S5B       = 0b0010_0000;
        const RESERVED  = 0b1100_0000;
    }
}

/// Playback timing region selected at `playback_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Ntsc,
    Pal,
}

impl Region {
    /// Encodes the region as the shim's `LDX #region` immediate.
    pub(crate) fn shim_operand(self) -> u8 {
        match self {
            Self::Ntsc => 0,
            Self::Pal => 1,
        }
    }
}

/// Parsed NSF v1 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub format_version: u8,
    pub total_songs: u8,
    /// 0-based starting song index (file stores a 1-based value).
    pub starting_song: u8,
    pub load_address: u16,
    pub init_address: u16,
    pub play_address: u16,
    name_raw: [u8; 32],
    artist_raw: [u8; 32],
    copyright_raw: [u8; 32],
    pub play_speed_ntsc_us: u16,
    pub play_speed_pal_us: u16,
    pub bankswitch_init: [u8; 8],
    pub region_flags: RegionFlags,
    pub extra_chips: ExtraChips,
    reserved: [u8; 4],
}

impl Header {
    /// Parses a 128-byte NSF v1 header.
    ///
    /// Fails with [`Error::BadMagic`] if the first five bytes differ from
    /// `4E 45 53 4D 1A`, or [`Error::ShortHeader`] if fewer than
    /// [`NSF_HEADER_LEN`] bytes are available. Reserved bits being set in
    /// the region or extra-chip flags is accepted (a diagnostic, not a
    /// parse failure — see the engine's error-handling design).
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < NSF_HEADER_LEN {
            return Err(Error::ShortHeader {
                actual: bytes.len(),
            });
        }
        if bytes[0..5] != MAGIC {
            return Err(Error::BadMagic);
        }

        let load_address = u16::from_le_bytes([bytes[8], bytes[9]]);

        let header = Header {
            format_version: bytes[5],
            total_songs: bytes[6],
            starting_song: bytes[7].saturating_sub(1),
            load_address,
            init_address: u16::from_le_bytes([bytes[10], bytes[11]]),
            play_address: u16::from_le_bytes([bytes[12], bytes[13]]),
            name_raw: bytes[14..46].try_into().expect("32 byte slice"),
            artist_raw: bytes[46..78].try_into().expect("32 byte slice"),
            copyright_raw: bytes[78..110].try_into().expect("32 byte slice"),
            play_speed_ntsc_us: u16::from_le_bytes([bytes[110], bytes[111]]),
            bankswitch_init: bytes[112..120].try_into().expect("8 byte slice"),
            play_speed_pal_us: u16::from_le_bytes([bytes[120], bytes[121]]),
            region_flags: RegionFlags::from_bits_truncate(bytes[122]),
            extra_chips: ExtraChips::from_bits_truncate(bytes[123]),
            reserved: bytes[124..128].try_into().expect("4 byte slice"),
        };

        if header.region_flags.intersects(RegionFlags::RESERVED) {
            tracing::warn!(
                bits = bytes[122],
                "NSF header sets reserved region-flag bits"
            );
        }
        if header.extra_chips.intersects(ExtraChips::RESERVED) {
            tracing::warn!(
                bits = bytes[123],
                "NSF header sets reserved extra-chip bits"
            );
        }

        Ok(header)
    }

    /// Re-encodes the header back into its original 128-byte form.
    ///
    /// Round-trips bit-for-bit with the bytes [`Header::parse`] was built
    /// from, including the reserved tail and any garbage past the first
    /// NUL in the text fields.
    pub fn to_bytes(&self) -> [u8; NSF_HEADER_LEN] {
        let mut out = [0u8; NSF_HEADER_LEN];
        out[0..5].copy_from_slice(&MAGIC);
        out[5] = self.format_version;
        out[6] = self.total_songs;
        out[7] = self.starting_song.wrapping_add(1);
        out[8..10].copy_from_slice(&self.load_address.to_le_bytes());
        out[10..12].copy_from_slice(&self.init_address.to_le_bytes());
        out[12..14].copy_from_slice(&self.play_address.to_le_bytes());
        out[14..46].copy_from_slice(&self.name_raw);
        out[46..78].copy_from_slice(&self.artist_raw);
        out[78..110].copy_from_slice(&self.copyright_raw);
        out[110..112].copy_from_slice(&self.play_speed_ntsc_us.to_le_bytes());
        out[112..120].copy_from_slice(&self.bankswitch_init);
        out[120..122].copy_from_slice(&self.play_speed_pal_us.to_le_bytes());
        out[122] = self.region_flags.bits();
        out[123] = self.extra_chips.bits();
        out[124..128].copy_from_slice(&self.reserved);
        out
    }

    /// Raw, NUL-padded song name field as stored in the file.
    pub fn name_raw(&self) -> &[u8; 32] {
        &self.name_raw
    }

    /// Raw, NUL-padded artist field as stored in the file.
    pub fn artist_raw(&self) -> &[u8; 32] {
        &self.artist_raw
    }

    /// Raw, NUL-padded copyright field as stored in the file.
    pub fn copyright_raw(&self) -> &[u8; 32] {
        &self.copyright_raw
    }

    /// Song name, truncated to the first NUL or 31 characters.
    pub fn name(&self) -> String {
        display_text(&self.name_raw)
    }

    /// Artist name, truncated to the first NUL or 31 characters.
    pub fn artist(&self) -> String {
        display_text(&self.artist_raw)
    }

    /// Copyright string, truncated to the first NUL or 31 characters.
    pub fn copyright(&self) -> String {
        display_text(&self.copyright_raw)
    }

    /// Whether any `bankswitch_init` entry is non-zero, i.e. the NSF uses
    /// bank-switched ROM init rather than a contiguous PRG image.
    pub fn is_bank_switched(&self) -> bool {
        self.bankswitch_init.iter().any(|&b| b != 0)
    }

    /// `true` when the song advertises dual-region playback support.
    pub fn is_dual_region(&self) -> bool {
        self.region_flags.contains(RegionFlags::DUAL)
    }

    /// Default region implied by the region flags (PAL bit, ignoring dual).
    pub fn default_region(&self) -> Region {
        if self.region_flags.contains(RegionFlags::PAL) {
            Region::Pal
        } else {
            Region::Ntsc
        }
    }
}

fn display_text(raw: &[u8; 32]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let end = end.min(TEXT_FIELD_DISPLAY_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Emits the header's fields as a structured `tracing::info!` event.
///
/// Corresponds to the engine's `log_header` operation.
pub fn log_header(header: &Header) {
    tracing::info!(
        format_version = header.format_version,
        total_songs = header.total_songs,
        starting_song = header.starting_song,
        load_address = format_args!("{:#06x}", header.load_address),
        init_address = format_args!("{:#06x}", header.init_address),
        play_address = format_args!("{:#06x}", header.play_address),
        name = %header.name(),
        artist = %header.artist(),
        copyright = %header.copyright(),
        play_speed_ntsc_us = header.play_speed_ntsc_us,
        play_speed_pal_us = header.play_speed_pal_us,
        bank_switched = header.is_bank_switched(),
        region_flags = format_args!("{:#04x}", header.region_flags.bits()),
        extra_chips = format_args!("{:#04x}", header.extra_chips.bits()),
        "parsed NSF header"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> [u8; NSF_HEADER_LEN] {
        let mut bytes = [0u8; NSF_HEADER_LEN];
        bytes[0..5].copy_from_slice(&MAGIC);
        bytes[5] = 1; // version
        bytes[6] = 4; // total songs
        bytes[7] = 1; // starting song (1-based)
        bytes[8..10].copy_from_slice(&0x8000u16.to_le_bytes());
        bytes[10..12].copy_from_slice(&0x8000u16.to_le_bytes());
        bytes[12..14].copy_from_slice(&0x8003u16.to_le_bytes());
        bytes[14..14 + 4].copy_from_slice(b"Song");
        bytes[46..46 + 6].copy_from_slice(b"Artist");
        bytes[78..78 + 4].copy_from_slice(b"1999");
        bytes[110..112].copy_from_slice(&16639u16.to_le_bytes());
        bytes[120..122].copy_from_slice(&19997u16.to_le_bytes());
        bytes
    }

    #[test]
    fn parse_then_reencode_is_bit_identical() {
        let bytes = sample_bytes();
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.to_bytes(), bytes);
    }

    #[test]
    fn starting_song_converted_to_zero_based() {
        let bytes = sample_bytes();
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.starting_song, 0);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample_bytes();
        bytes[0] = 0x00;
        assert!(matches!(Header::parse(&bytes), Err(Error::BadMagic)));
    }

    #[test]
    fn short_header_is_rejected() {
        let bytes = sample_bytes();
        let err = Header::parse(&bytes[..127]).unwrap_err();
        assert!(matches!(err, Error::ShortHeader { actual: 127 }));
    }

    #[test]
    fn reserved_region_bits_are_accepted_as_diagnostic() {
        let mut bytes = sample_bytes();
        bytes[122] = 0xFF;
        let header = Header::parse(&bytes).expect("reserved bits are non-fatal");
        assert!(header.region_flags.intersects(RegionFlags::RESERVED));
    }

    #[test]
    fn is_bank_switched_reflects_init_vector() {
        let bytes = sample_bytes();
        let mut header = Header::parse(&bytes).unwrap();
        assert!(!header.is_bank_switched());
        header.bankswitch_init[3] = 7;
        assert!(header.is_bank_switched());
    }

    #[test]
    fn text_fields_truncate_for_display_but_not_storage() {
        let mut bytes = sample_bytes();
        let long = [b'x'; 32];
        bytes[14..46].copy_from_slice(&long);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.name().len(), TEXT_FIELD_DISPLAY_LEN);
        assert_eq!(header.name_raw(), &long);
        assert_eq!(header.to_bytes()[14..46], long);
    }
}
