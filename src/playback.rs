//! Playback controller: opens an NSF file, assembles the driver shim, and
//! drives the CPU collaborator frame by frame.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bank_cache::BankCache;
use crate::bus::{Bus, Rom};
use crate::collaborators::{ApuSink, Cpu, MemoryBus, NullApuSink};
use crate::error::Error;
use crate::header::Header;
use crate::memory::SHIM_IDLE_ADDR;
use crate::shim;

/// Guards the single-active-engine invariant (§5): the CPU collaborator is
/// treated as process-global, so at most one [`Engine`] may exist.
static ENGINE_OPEN: AtomicBool = AtomicBool::new(false);

/// Generous bound on single-step iterations during `playback_init`'s
/// reset-to-idle walk and each `playback_frame`'s play-to-idle walk. A
/// driver program that never returns to `$1007` is a bug in the supplied
/// CPU or ROM, not something this engine should hang waiting on.
const MAX_INIT_STEPS: u32 = 1_000_000;
const MAX_FRAME_STEPS: u32 = 1_000_000;

/// Reads and parses the 128-byte NSF header at `path` without opening a
/// full [`Engine`].
pub fn read_header(path: impl AsRef<Path>) -> Result<Header, Error> {
    let mut file = File::open(path)?;
    let mut bytes = [0u8; crate::header::NSF_HEADER_LEN];
    file.read_exact(&mut bytes)?;
    Header::parse(&bytes)
}

/// An open NSF file bound to a caller-supplied 6502 interpreter.
///
/// `R` is the underlying file/reader the ROM backing reads bank data from;
/// `C` is the 6502 interpreter driving the bus. Only one `Engine` may exist
/// at a time across the process (see module docs).
pub struct Engine<C, R> {
    header: Header,
    cpu: C,
    bus: Bus<R>,
}

impl<C: Cpu> Engine<C, File> {
    /// Opens `path`, parses its header, and picks the ROM backing strategy
    /// implied by `bankswitch_init`. Fails with [`Error::AlreadyOpen`] if
    /// another engine is currently live.
    pub fn open(path: impl AsRef<Path>, cpu: C) -> Result<Self, Error> {
        let file = File::open(path)?;
        Self::from_reader(file, cpu)
    }
}

impl<C: Cpu, R: Read + Seek> Engine<C, R> {
    /// Generic entry point `open` wraps for files: parses the header from
    /// `reader` and picks a ROM backing strategy, without requiring a real
    /// file on disk. Useful for tests and for embedding NSF bytes already
    /// held in memory.
    pub fn from_reader(mut reader: R, cpu: C) -> Result<Self, Error> {
        if ENGINE_OPEN
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyOpen);
        }

        match Self::build(&mut reader) {
            Ok(header) => {
                let rom = if header.is_bank_switched() {
                    Rom::BankSwitched(BankCache::new(reader, header.load_address))
                } else {
                    Rom::Contiguous {
                        reader,
                        buf: Box::new([0u8; 0x8000]),
                    }
                };
                Ok(Engine {
                    header,
                    cpu,
                    bus: Bus::new(rom, Box::new(NullApuSink)),
                })
            }
            Err(err) => {
                ENGINE_OPEN.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn build(reader: &mut R) -> Result<Header, Error> {
        reader.seek(SeekFrom::Start(0))?;
        let mut bytes = [0u8; crate::header::NSF_HEADER_LEN];
        reader.read_exact(&mut bytes)?;
        Header::parse(&bytes)
    }

    /// The parsed header, unchanged since `open`.
    pub fn get_header(&self) -> &Header {
        &self.header
    }

    /// Logs the engine's header via [`crate::header::log_header`].
    pub fn log_header(&self) {
        crate::header::log_header(&self.header);
    }

    /// Reads one byte off the bus, exactly as the CPU collaborator would.
    pub fn read(&mut self, addr: u16) -> u8 {
        self.bus.read(addr)
    }

    /// Writes one byte to the bus, exactly as the CPU collaborator would.
    pub fn write(&mut self, addr: u16, value: u8) {
        self.bus.write(addr, value)
    }

    /// Directly invokes the bank-register load path, bypassing the bus
    /// write it's normally triggered by; mainly useful for tests that
    /// drive bank switching without a CPU.
    pub fn load_bank(&mut self, register_index: usize, bank_id: u8) -> Result<(), Error> {
        self.bus.load_bank(register_index, bank_id)
    }

    /// Bank id currently shown by ROM window `register_index`; exposed for
    /// tests and diagnostics.
    pub fn rom_block_bank_id(&self, register_index: usize) -> u8 {
        self.bus.rom_block_bank_id(register_index)
    }

    /// Resets RAM/APU/bank registers, assembles the driver shim, loads ROM
    /// per the header's bank-switch vector (or as one contiguous image),
    /// resets the CPU, and single-steps it to the `$1007` idle loop.
    ///
    /// The playback region is not a caller choice: it's derived from the
    /// header's region flags via [`Header::default_region`].
    pub fn playback_init(&mut self, song_index: u8, sink: Box<dyn ApuSink>) -> Result<(), Error> {
        let region = self.header.default_region();
        let span = tracing::debug_span!(
            "playback_init",
            song_index,
            ?region,
            dual_region = self.header.is_dual_region(),
        );
        let _enter = span.enter();

        if self.header.load_address < crate::memory::ROM_START {
            return Err(Error::BadLoadAddress {
                load_address: self.header.load_address,
            });
        }

        self.bus.reset_for_init();
        self.bus.set_sink(sink);
        self.bus.init_apu_frame_counter();
        self.bus.install_shim(shim::build(
            song_index,
            region,
            self.header.init_address,
            self.header.play_address,
        ));

        if self.header.is_bank_switched() {
            for (index, &bank_id) in self.header.bankswitch_init.iter().enumerate() {
                self.bus.load_bank(index, bank_id)?;
            }
        } else {
            self.bus.contiguous_init(self.header.load_address)?;
        }

        self.cpu.reset(&mut self.bus as &mut dyn MemoryBus);
        self.step_until_idle(MAX_INIT_STEPS)
    }

    /// Steps the CPU through one `JSR play / JMP` cycle. Requires the CPU
    /// to be sitting at the `$1007` idle loop on entry.
    pub fn playback_frame(&mut self) -> Result<(), Error> {
        let span = tracing::debug_span!("playback_frame");
        let _enter = span.enter();

        let actual_pc = self.cpu.pc();
        if actual_pc != SHIM_IDLE_ADDR {
            return Err(Error::InvalidState {
                expected_pc: SHIM_IDLE_ADDR,
                actual_pc,
            });
        }

        self.cpu.step(&mut self.bus as &mut dyn MemoryBus);
        self.step_until_idle(MAX_FRAME_STEPS)
    }

    fn step_until_idle(&mut self, max_steps: u32) -> Result<(), Error> {
        let mut steps = 0;
        while self.cpu.pc() != SHIM_IDLE_ADDR {
            if steps >= max_steps {
                return Err(Error::InvalidState {
                    expected_pc: SHIM_IDLE_ADDR,
                    actual_pc: self.cpu.pc(),
                });
            }
            self.cpu.step(&mut self.bus as &mut dyn MemoryBus);
            steps += 1;
        }
        Ok(())
    }

    /// Frees ROM buffers, closes the file, and releases the process-wide
    /// active-engine slot. Equivalent to dropping the engine; exposed as an
    /// explicit method so callers have a named teardown point.
    pub fn close(self) {
        drop(self);
    }
}

impl<C, R> Drop for Engine<C, R> {
    fn drop(&mut self) {
        ENGINE_OPEN.store(false, Ordering::SeqCst);
    }
}
