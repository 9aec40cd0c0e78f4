//! # OpenAFE Voltammetry Host Library
//!
//! Drives an OpenAFE potentiostat over its serial link: encodes the sweep
//! command, reads the measured points back until the board reports the end
//! of the sweep, and charts the resulting voltammogram in the terminal.
//!
//! The protocol encoding, response parsing and chart layout are plain
//! functions that need neither hardware nor a display; [`device::OpenAfe`]
//! and [`plot::TerminalPlotter`] are the thin layers doing the actual I/O.

pub mod config;
pub mod device;
pub mod error;
pub mod link;
pub mod plot;
pub mod protocol;
pub mod reader;
pub mod sample;

pub use config::{AppConfig, LinkConfig, PlotConfig, PulseConfig, SweepConfig, VoltammetryType};
pub use device::{Acquisition, OpenAfe};
pub use error::DeviceError;
pub use protocol::{Command, Message, ProtocolError};
pub use reader::{ReaderState, ResponseReader};
pub use sample::{Sample, SampleSeries};
