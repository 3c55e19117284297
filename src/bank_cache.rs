//! Fixed-slot LRU cache resolving the eight 4 KiB ROM windows (`$8000-$FFFF`)
//! against a file that may hold far more than `CACHE_SLOTS` banks.

use std::io::{Read, Seek, SeekFrom};

use crate::error::Error;
use crate::memory::ROM_SLOT_SIZE;

/// Number of resident 4 KiB cache slots (`C` in the design doc).
pub const CACHE_SLOTS: usize = 10;

/// Sentinel marking an empty `lru` entry.
const LRU_EMPTY: i16 = -1;

/// One 4 KiB bank buffer.
type BankBuf = [u8; ROM_SLOT_SIZE];

/// Bank-switched ROM cache: `CACHE_SLOTS` resident 4 KiB buffers, LRU-evicted,
/// backing up to 256 on-disk banks addressed by `$5FF8-$5FFF` writes.
pub struct BankCache<R> {
    reader: R,
    load_address: u16,
    cache: Box<[BankBuf; CACHE_SLOTS]>,
    slot_bank_id: [u8; CACHE_SLOTS],
    slot_loaded: [bool; CACHE_SLOTS],
    lru: [i16; CACHE_SLOTS],
    rom_block: [Option<usize>; 8],
    rom_block_bank_id: [u8; 8],
}

impl<R: Read + Seek> BankCache<R> {
    pub fn new(reader: R, load_address: u16) -> Self {
        Self {
            reader,
            load_address,
            cache: Box::new([[0u8; ROM_SLOT_SIZE]; CACHE_SLOTS]),
            slot_bank_id: [0; CACHE_SLOTS],
            slot_loaded: [false; CACHE_SLOTS],
            lru: [LRU_EMPTY; CACHE_SLOTS],
            rom_block: [None; 8],
            rom_block_bank_id: [0; 8],
        }
    }

    /// Clears all residency state (slots, LRU, and ROM-window mapping) without
    /// touching the reader. Used by `playback_init` before replaying the
    /// bank-switch init vector.
    pub fn reset(&mut self) {
        for slot in self.cache.iter_mut() {
            slot.fill(0);
        }
        self.slot_bank_id = [0; CACHE_SLOTS];
        self.slot_loaded = [false; CACHE_SLOTS];
        self.lru = [LRU_EMPTY; CACHE_SLOTS];
        self.rom_block = [None; 8];
        self.rom_block_bank_id = [0; 8];
    }

    /// Bank id currently shown by ROM window `register_index` (0 if unmapped).
    pub fn rom_block_bank_id(&self, register_index: usize) -> u8 {
        self.rom_block_bank_id[register_index]
    }

    /// Whether ROM window `register_index` currently resolves to a loaded slot.
    pub fn is_mapped(&self, register_index: usize) -> bool {
        self.rom_block[register_index].is_some()
    }

    /// Returns the resident bank ids, head (most recently used) first.
    #[cfg(test)]
    pub fn lru_order(&self) -> Vec<u8> {
        self.lru
            .iter()
            .take_while(|&&b| b != LRU_EMPTY)
            .map(|&b| b as u8)
            .collect()
    }

    /// Ensures `bank_id` is resident and points ROM window `register_index`
    /// at it, per the design's hit-path/miss-path algorithm.
    pub fn load_bank(&mut self, register_index: usize, bank_id: u8) -> Result<(), Error> {
        if register_index >= 8 {
            return Err(Error::InvalidArg("bank register index out of range"));
        }

        if let Some(slot) = self.find_loaded_slot(bank_id) {
            self.rom_block[register_index] = Some(slot);
            self.rom_block_bank_id[register_index] = bank_id;
            self.touch_lru(bank_id)?;
            return Ok(());
        }

        let victim = self.pick_victim()?;
        self.fill_slot(victim, bank_id)?;

        self.slot_loaded[victim] = true;
        self.slot_bank_id[victim] = bank_id;
        self.rom_block[register_index] = Some(victim);
        self.rom_block_bank_id[register_index] = bank_id;
        self.touch_lru(bank_id)?;
        Ok(())
    }

    /// Reads one byte from `$8000..=$FFF9`, updating LRU on a successful hit.
    ///
    /// An unmapped window returns `0` and logs a diagnostic; this is a
    /// non-fatal anomaly, not an error.
    pub fn read(&mut self, addr: u16) -> u8 {
        let window = usize::from((addr >> 12) & 0x7);
        let Some(slot) = self.rom_block[window] else {
            tracing::warn!(addr = format_args!("{addr:#06x}"), window, "read from unmapped ROM window");
            return 0;
        };
        let offset = usize::from(addr & 0x0FFF);
        let byte = self.cache[slot][offset];
        let bank_id = self.rom_block_bank_id[window];
        // Invariant 5: a successful bank read moves the bank to lru[0].
        if let Err(err) = self.touch_lru(bank_id) {
            tracing::error!(?err, "LRU touch failed on ROM read");
        }
        byte
    }

    fn find_loaded_slot(&self, bank_id: u8) -> Option<usize> {
        (0..CACHE_SLOTS).find(|&i| self.slot_loaded[i] && self.slot_bank_id[i] == bank_id)
    }

    fn pick_victim(&mut self) -> Result<usize, Error> {
        if let Some(free) = (0..CACHE_SLOTS).find(|&i| !self.slot_loaded[i]) {
            return Ok(free);
        }

        let oldest = self.lru[CACHE_SLOTS - 1];
        if oldest == LRU_EMPTY {
            return Err(Error::InternalError(
                "LRU tail is empty while all slots are loaded",
            ));
        }
        let oldest = oldest as u8;
        let victim = (0..CACHE_SLOTS)
            .find(|&i| self.slot_loaded[i] && self.slot_bank_id[i] == oldest)
            .ok_or(Error::InternalError(
                "LRU tail bank id has no resident slot",
            ))?;

        self.lru[CACHE_SLOTS - 1] = LRU_EMPTY;
        self.slot_loaded[victim] = false;
        self.slot_bank_id[victim] = 0;

        // Deviation from the source's latent bug (see design notes): null
        // out any ROM window that still shows the *evicted bank id*, not
        // any window that happens to equal the victim's slot index.
        for k in 0..8 {
            if self.rom_block[k] == Some(victim) && self.rom_block_bank_id[k] == oldest {
                self.rom_block[k] = None;
                self.rom_block_bank_id[k] = 0;
            }
        }

        Ok(victim)
    }

    fn fill_slot(&mut self, slot: usize, bank_id: u8) -> Result<(), Error> {
        let padding = usize::from(self.load_address & 0x0FFF);
        let (file_offset, dest_offset, len) = if bank_id == 0 {
            (crate::memory::BODY_OFFSET, padding, ROM_SLOT_SIZE - padding)
        } else {
            let file_offset = crate::memory::BODY_OFFSET
                + (ROM_SLOT_SIZE - padding) as u64
                + ROM_SLOT_SIZE as u64 * (bank_id as u64 - 1);
            (file_offset, 0, ROM_SLOT_SIZE)
        };

        self.cache[slot].fill(0);
        self.reader.seek(SeekFrom::Start(file_offset))?;
        let dest = &mut self.cache[slot][dest_offset..dest_offset + len];
        read_with_short_eof(&mut self.reader, dest)?;
        Ok(())
    }

    /// Moves `bank_id` to the head of the LRU list, per the design's touch
    /// algorithm: no-op if already head, shift-left-of-`i` if resident
    /// elsewhere, or shift-and-insert if not yet resident (tail must be the
    /// empty sentinel in that case).
    fn touch_lru(&mut self, bank_id: u8) -> Result<(), Error> {
        let bank_id = bank_id as i16;
        if self.lru[0] == bank_id {
            return Ok(());
        }

        if let Some(i) = self.lru.iter().position(|&b| b == bank_id) {
            self.lru.copy_within(0..i, 1);
            self.lru[0] = bank_id;
            return Ok(());
        }

        if self.lru[CACHE_SLOTS - 1] != LRU_EMPTY {
            return Err(Error::InternalError(
                "LRU touch of a non-resident bank with a full list",
            ));
        }
        self.lru.copy_within(0..CACHE_SLOTS - 1, 1);
        self.lru[0] = bank_id;
        Ok(())
    }
}

/// Reads exactly `buf.len()` bytes, except a zero-length read at EOF is
/// accepted (remaining bytes stay zero per the caller's pre-zeroed buffer).
pub(crate) fn read_with_short_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    if filled < buf.len() {
        tracing::warn!(
            requested = buf.len(),
            filled,
            "ROM body shorter than requested, padding remainder with zero"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn banked_image(bank_count: usize, load_address: u16) -> Vec<u8> {
        let padding = (load_address & 0x0FFF) as usize;
        let mut body = vec![0u8; 0x80];
        // Bank 0 is short by `padding` bytes.
        for bank in 0..bank_count {
            let len = if bank == 0 {
                4096 - padding
            } else {
                4096
            };
            body.extend((0..len).map(|i| ((bank * 16 + i) & 0xFF) as u8));
        }
        body
    }

    #[test]
    fn hit_path_is_idempotent() {
        let mut cache = BankCache::new(Cursor::new(banked_image(2, 0x8000)), 0x8000);
        cache.load_bank(0, 1).unwrap();
        let before = cache.rom_block_bank_id(0);
        cache.load_bank(0, 1).unwrap();
        assert_eq!(before, cache.rom_block_bank_id(0));
        assert_eq!(cache.lru_order(), vec![1]);
    }

    #[test]
    fn bank_zero_padding_is_zero_and_remainder_matches_file() {
        let load_address = 0x8123;
        let padding = (load_address & 0x0FFF) as usize;
        let image = banked_image(1, load_address);
        let mut cache = BankCache::new(Cursor::new(image.clone()), load_address);
        cache.load_bank(0, 0).unwrap();

        for off in 0..padding {
            assert_eq!(cache.read(0x8000 + off as u16), 0);
        }
        for off in padding..4096 {
            let expected = image[0x80 + (off - padding)];
            assert_eq!(cache.read(0x8000 + off as u16), expected);
        }
    }

    #[test]
    fn eleven_banks_evict_exactly_one_lru_tail() {
        let image = banked_image(11, 0x8000);
        let mut cache = BankCache::new(Cursor::new(image), 0x8000);
        for bank in 0..11u8 {
            cache.load_bank(0, bank).unwrap();
        }
        // Bank 0 was the first loaded and should have been evicted.
        assert!(!cache.lru_order().contains(&0));
        assert_eq!(cache.lru_order().len(), CACHE_SLOTS);

        cache.load_bank(0, 0).unwrap();
        assert!(!cache.lru_order().contains(&1));
    }

    #[test]
    fn writing_same_value_twice_is_a_single_load() {
        let mut cache = BankCache::new(Cursor::new(banked_image(2, 0x8000)), 0x8000);
        cache.load_bank(0, 1).unwrap();
        let mapped_before = cache.rom_block_bank_id(0);
        cache.load_bank(0, 1).unwrap();
        assert_eq!(mapped_before, 1);
        assert_eq!(cache.rom_block_bank_id(0), 1);
    }

    #[test]
    fn read_from_unmapped_window_returns_zero() {
        let mut cache = BankCache::new(Cursor::new(banked_image(1, 0x8000)), 0x8000);
        assert_eq!(cache.read(0x9000), 0);
        assert!(!cache.is_mapped(1));
    }

    #[test]
    fn load_bank_rejects_out_of_range_register() {
        let mut cache = BankCache::new(Cursor::new(banked_image(1, 0x8000)), 0x8000);
        assert!(matches!(
            cache.load_bank(8, 0),
            Err(Error::InvalidArg(_))
        ));
    }

    /// P2/P3: after an arbitrary sequence of `load_bank` calls, no bank id
    /// occupies more than one slot, and the LRU list is a permutation of
    /// exactly the resident bank ids.
    #[test]
    fn random_load_sequence_preserves_residency_invariants() {
        use rand::{Rng, SeedableRng};
        use rand::rngs::StdRng;

        let mut cache = BankCache::new(Cursor::new(banked_image(256, 0x8000)), 0x8000);
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);

        for _ in 0..2000 {
            let register = rng.gen_range(0..8);
            let bank_id = rng.gen_range(0..=255);
            cache.load_bank(register, bank_id).unwrap();

            let resident: Vec<u8> = (0..CACHE_SLOTS)
                .filter(|&i| cache.slot_loaded[i])
                .map(|i| cache.slot_bank_id[i])
                .collect();
            let mut dedup = resident.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(resident.len(), dedup.len(), "a bank id occupies two slots");

            let mut lru_sorted = cache.lru_order();
            lru_sorted.sort_unstable();
            let mut resident_sorted = resident;
            resident_sorted.sort_unstable();
            assert_eq!(lru_sorted, resident_sorted);

            for k in 0..8 {
                if let Some(slot) = cache.rom_block[k] {
                    assert_eq!(cache.slot_bank_id[slot], cache.rom_block_bank_id[k]);
                }
            }
        }
    }
}
