//! Session with an OpenAFE board.

use crate::config::{LinkConfig, PulseConfig, SweepConfig};
use crate::error::DeviceError;
use crate::link::{LineSource, Link};
use crate::protocol::{decode_frame, Command, Message};
use crate::reader::{ReaderState, ResponseReader};
use crate::sample::SampleSeries;
use log::{debug, info, warn};
use std::io::{Read, Write};
use std::ops::ControlFlow;
use std::time::Instant;

/// The firmware only talks at this rate.
pub const BAUD_RATE: u32 = 115_200;

/// Result of one sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub samples: SampleSeries,
    /// `Done` when the board ended the sweep, `Stopped` when the caller
    /// did, `TimedOut` otherwise.
    pub state: ReaderState,
    /// Lines dropped as malformed.
    pub skipped: usize,
}

impl Acquisition {
    pub fn is_complete(&self) -> bool {
        self.state == ReaderState::Done
    }
}

/// A connected board. Dropping it closes the port.
pub struct OpenAfe<T> {
    link: Link<T>,
    link_config: LinkConfig,
}

impl OpenAfe<Box<dyn serialport::SerialPort>> {
    /// Open `port` at [`BAUD_RATE`] and wait for the board to announce itself.
    pub fn open(port: &str, link_config: &LinkConfig) -> Result<Self, DeviceError> {
        let serial = serialport::new(port, BAUD_RATE)
            .timeout(link_config.read_timeout())
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|source| DeviceError::Open {
                port: port.to_string(),
                source,
            })?;

        info!("opened {} at {} baud", port, BAUD_RATE);
        Self::connect(serial, link_config)
    }
}

impl<T: Read + Write> OpenAfe<T> {
    /// Wrap an already open port and perform the ready handshake.
    pub fn connect(port: T, link_config: &LinkConfig) -> Result<Self, DeviceError> {
        let mut device = Self {
            link: Link::new(port),
            link_config: link_config.clone(),
        };

        match device.wait_for_message()? {
            Message::Ready => {
                info!("device ready");
                Ok(device)
            }
            other => Err(DeviceError::NotReady(format!("{:?}", other))),
        }
    }

    /// Send a command and check the board's reply.
    pub fn send_command(&mut self, command: &Command) -> Result<(), DeviceError> {
        debug!("sending {}", command);
        self.link.send(command)?;

        match self.wait_for_message()? {
            Message::Error(code) => Err(DeviceError::Rejected {
                command: command.to_string(),
                code,
            }),
            reply => {
                debug!("{} acknowledged with {:?}", command, reply);
                Ok(())
            }
        }
    }

    /// Select the current measurement range, in microamps.
    pub fn set_current_range(&mut self, microamps: u32) -> Result<(), DeviceError> {
        self.send_command(&Command::SetCurrentRange { microamps })
    }

    /// Start a sweep and collect its samples.
    ///
    /// `on_sample` sees the series after every new sample, e.g. to redraw a
    /// live chart. Returning `ControlFlow::Break` from it stops the sweep. A
    /// timeout or a stop ends the sweep with whatever arrived so far.
    pub fn run_sweep<F>(
        &mut self,
        sweep: &SweepConfig,
        pulse: &PulseConfig,
        mut on_sample: F,
    ) -> Result<Acquisition, DeviceError>
    where
        F: FnMut(&SampleSeries) -> ControlFlow<()>,
    {
        let command = Command::for_sweep(sweep, pulse);
        info!("starting {} sweep: {}", sweep.voltammetry_type, command);
        self.send_command(&command)?;

        let idle_timeout = self.link_config.idle_timeout();
        let deadline = sweep
            .expected_duration(pulse)
            .map(|expected| expected * 2 + idle_timeout);

        let mut samples = SampleSeries::new();
        let mut reader = ResponseReader::new(&mut self.link, idle_timeout).with_deadline(deadline);

        while let Some(sample) = reader.next() {
            samples.push(sample?);
            if on_sample(&samples).is_break() {
                info!("sweep stopped after {} samples", samples.len());
                reader.stop();
            }
        }

        let acquisition = Acquisition {
            samples,
            state: reader.state(),
            skipped: reader.skipped(),
        };

        if acquisition.skipped > 0 {
            warn!("{} malformed lines were skipped", acquisition.skipped);
        }
        info!(
            "received {} samples ({:?})",
            acquisition.samples.len(),
            acquisition.state
        );
        Ok(acquisition)
    }

    /// Release the port.
    pub fn into_inner(self) -> T {
        self.link.into_inner()
    }

    /// Next non-empty message. Unlike during a sweep, a corrupted frame here
    /// is an error.
    fn wait_for_message(&mut self) -> Result<Message, DeviceError> {
        let timeout = self.link_config.idle_timeout();
        let started = Instant::now();

        while started.elapsed() < timeout {
            match self.link.next_line()? {
                Some(line) if !line.trim().is_empty() => {
                    let body = decode_frame(&line)?;
                    return Ok(body.parse()?);
                }
                _ => continue,
            }
        }

        Err(DeviceError::NoResponse(timeout))
    }
}

impl<T> std::fmt::Debug for OpenAfe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAfe")
            .field("link_config", &self.link_config)
            .finish_non_exhaustive()
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, DeviceError> {
    let ports = serialport::available_ports().map_err(DeviceError::Enumerate)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
