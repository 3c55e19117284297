//! NSF playback engine: header parsing, bank-switched ROM cache, memory
//! bus, driver shim, and playback controller for a caller-supplied 6502
//! interpreter and APU write sink.

pub mod bank_cache;
pub mod bus;
pub mod collaborators;
pub mod error;
pub mod header;
pub mod memory;
pub mod playback;
pub mod shim;

pub use collaborators::{ApuSink, Cpu, MemoryBus, NullApuSink};
pub use error::Error;
pub use header::{Header, Region};
pub use playback::{read_header, Engine};
