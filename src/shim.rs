//! The hand-assembled 6502 driver stub installed at `$1000`.
//!
//! `build` lays out the bytes exactly as specified: load the song/region
//! selectors, call `INIT`, fall into the `$1007` idle loop that repeatedly
//! calls `PLAY`. Offsets below are positions within the shim buffer, not
//! absolute 6502 addresses (add [`crate::memory::SHIM_START`] for that).

use crate::header::Region;
use crate::memory::SHIM_SIZE;

const LDA_IMM: u8 = 0xA9;
const LDX_IMM: u8 = 0xA2;
const JSR_ABS: u8 = 0x20;
const JMP_ABS: u8 = 0x4C;
const NOP: u8 = 0xEA;

/// Builds the 128-byte shim region; only the first 16 bytes are meaningful,
/// the rest is filler the CPU never reaches.
pub fn build(song: u8, region: Region, init_address: u16, play_address: u16) -> [u8; SHIM_SIZE] {
    let mut shim = [0u8; SHIM_SIZE];
    let init_bytes = init_address.to_le_bytes();
    let play_bytes = play_address.to_le_bytes();

    shim[0x00] = LDA_IMM;
    shim[0x01] = song;
    shim[0x02] = LDX_IMM;
    shim[0x03] = region.shim_operand();
    shim[0x04] = JSR_ABS;
    shim[0x05] = init_bytes[0];
    shim[0x06] = init_bytes[1];
    shim[0x07] = JSR_ABS;
    shim[0x08] = play_bytes[0];
    shim[0x09] = play_bytes[1];
    shim[0x0A] = JMP_ABS;
    shim[0x0B] = 0x07;
    shim[0x0C] = 0x10;
    shim[0x0D..=0x10].fill(NOP);

    shim
}
