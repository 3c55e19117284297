//! The 16-bit NES address decoder sitting between the CPU collaborator,
//! work RAM, the driver shim, the APU register shadow, and ROM (bank-cached
//! or contiguous, depending on how the song was initialized).

use std::io::{Read, Seek, SeekFrom};

use crate::bank_cache::{read_with_short_eof, BankCache};
use crate::collaborators::{ApuSink, MemoryBus};
use crate::error::Error;
use crate::memory::*;

/// Backing storage for the `$8000-$FFF9` ROM window, chosen once per
/// `playback_init` depending on whether the header's bank-switch init
/// vector is all zero.
pub(crate) enum Rom<R> {
    /// At least one `bankswitch_init` entry was non-zero: reads/writes
    /// flow through the LRU-evicted bank cache.
    BankSwitched(BankCache<R>),
    /// All `bankswitch_init` entries were zero: the whole body was loaded
    /// into a flat 32 KiB buffer and every slot aliases it directly.
    Contiguous { reader: R, buf: Box<[u8; 0x8000]> },
}

impl<R: Read + Seek> Rom<R> {
    fn read(&mut self, addr: u16) -> u8 {
        match self {
            Rom::BankSwitched(cache) => cache.read(addr),
            Rom::Contiguous { buf, .. } => buf[usize::from(addr - ROM_START)],
        }
    }

    /// Forwards a bank-register write to the cache. In contiguous mode
    /// there is nothing to switch, matching the reference behavior that a
    /// non-banked song never touches `$5FF8-$5FFF`.
    fn load_bank(&mut self, register_index: usize, bank_id: u8) -> Result<(), crate::error::Error> {
        match self {
            Rom::BankSwitched(cache) => cache.load_bank(register_index, bank_id),
            Rom::Contiguous { .. } => Ok(()),
        }
    }

    fn rom_block_bank_id(&self, register_index: usize) -> u8 {
        match self {
            Rom::BankSwitched(cache) => cache.rom_block_bank_id(register_index),
            Rom::Contiguous { .. } => 0,
        }
    }

    /// Clears residency (bank-switched) or re-reads the flat image
    /// (contiguous) ahead of a fresh `playback_init`.
    fn reset(&mut self) {
        match self {
            Rom::BankSwitched(cache) => cache.reset(),
            Rom::Contiguous { buf, .. } => buf.fill(0),
        }
    }

    /// Contiguous-init: loads the whole body at `load_address` into the
    /// flat buffer. A no-op for the bank-switched variant, which is filled
    /// bank-by-bank via `load_bank` instead. Callers are expected to have
    /// already validated `load_address >= ROM_START`, as `playback_init`
    /// does once, ahead of either ROM-loading path.
    fn contiguous_init(&mut self, load_address: u16) -> Result<(), Error> {
        let Rom::Contiguous { reader, buf } = self else {
            return Ok(());
        };
        debug_assert!(load_address >= ROM_START);

        reader.seek(SeekFrom::Start(BODY_OFFSET))?;
        let start = usize::from(load_address - ROM_START);
        let len = usize::from(0xFFFFu16 - load_address).min(buf.len() - start);
        read_with_short_eof(reader, &mut buf[start..start + len])?;
        Ok(())
    }
}

/// The NES memory bus: owns work RAM, the driver shim, the APU register
/// shadow, the mapper registers, the ROM backing, and the interrupt
/// vectors. Implements [`MemoryBus`] so any [`crate::collaborators::Cpu`]
/// can drive it.
pub struct Bus<R> {
    ram: [u8; RAM_SIZE],
    shim: [u8; SHIM_SIZE],
    apu_regs: [u8; APU_SIZE],
    bank_regs: [u8; BANK_REGS_COUNT],
    pub(crate) rom: Rom<R>,
    int_vecs: [u8; INT_VECS_COUNT],
    sink: Box<dyn ApuSink>,
}

impl<R: Read + Seek> Bus<R> {
    pub(crate) fn new(rom: Rom<R>, sink: Box<dyn ApuSink>) -> Self {
        let mut bus = Self {
            ram: [0; RAM_SIZE],
            shim: [0; SHIM_SIZE],
            apu_regs: [0; APU_SIZE],
            bank_regs: [0; BANK_REGS_COUNT],
            rom,
            int_vecs: [0; INT_VECS_COUNT],
            sink,
        };
        // Reset vector -> $1000, where the shim's INIT/PLAY dispatch begins.
        bus.int_vecs[2] = 0x00;
        bus.int_vecs[3] = 0x10;
        bus
    }

    pub(crate) fn install_shim(&mut self, shim: [u8; SHIM_SIZE]) {
        self.shim = shim;
    }

    pub(crate) fn init_apu_frame_counter(&mut self) {
        self.apu_regs[0x17] = 0x40;
    }

    pub(crate) fn set_sink(&mut self, sink: Box<dyn ApuSink>) {
        self.sink = sink;
    }

    /// Zeroes RAM, the APU register shadow, and the bank registers, and
    /// drops any residency the ROM backing is carrying — the state every
    /// `playback_init` call starts from.
    pub(crate) fn reset_for_init(&mut self) {
        self.ram = [0; RAM_SIZE];
        self.apu_regs = [0; APU_SIZE];
        self.bank_regs = [0; BANK_REGS_COUNT];
        self.rom.reset();
    }

    pub(crate) fn contiguous_init(&mut self, load_address: u16) -> Result<(), crate::error::Error> {
        self.rom.contiguous_init(load_address)
    }

    pub(crate) fn load_bank(&mut self, register_index: usize, bank_id: u8) -> Result<(), crate::error::Error> {
        self.rom.load_bank(register_index, bank_id)
    }

    /// Bank id currently shown by ROM window `register_index` (for tests
    /// and diagnostics; always `0` in contiguous mode).
    pub fn rom_block_bank_id(&self, register_index: usize) -> u8 {
        self.rom.rom_block_bank_id(register_index)
    }

    fn bank_write(&mut self, addr: u16, value: u8) {
        let index = usize::from(addr - BANK_REGS_START);
        if self.bank_regs[index] == value {
            return;
        }
        self.bank_regs[index] = value;
        if let Err(err) = self.load_bank(index, value) {
            tracing::error!(?err, index, value, "bank-switch write failed");
        }
    }

    fn apu_write(&mut self, addr: u16, value: u8) {
        let index = usize::from(addr - APU_START);
        self.apu_regs[index] = value;
        if addr != APU_CONTROLLER_STROBE {
            self.sink.write(addr, value);
        }
    }
}

impl<R: Read + Seek> MemoryBus for Bus<R> {
    fn read(&mut self, addr: u16) -> u8 {
        match addr {
            RAM_START..=RAM_END => self.ram[usize::from(addr)],
            SHIM_START..=SHIM_END => self.shim[usize::from(addr - SHIM_START)],
            APU_START..=APU_END => self.apu_regs[usize::from(addr - APU_START)],
            BANK_REGS_START..=BANK_REGS_END => self.bank_regs[usize::from(addr - BANK_REGS_START)],
            ROM_START..=ROM_LAST_BANKED_ADDR => self.rom.read(addr),
            INT_VECS_START..=INT_VECS_END => self.int_vecs[usize::from(addr - INT_VECS_START)],
            _ => 0,
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        match addr {
            RAM_START..=RAM_END => self.ram[usize::from(addr)] = value,
            APU_START..=APU_END => self.apu_write(addr, value),
            BANK_REGS_START..=BANK_REGS_END => self.bank_write(addr, value),
            // Shim, ROM, and interrupt vectors are read-only on this bus;
            // everything else not listed in the decoding table is discarded.
            _ => {}
        }
    }
}
