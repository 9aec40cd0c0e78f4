//! OpenAFE serial protocol.
//!
//! Both directions use the same NMEA-like frame: `$<body>*<HH>`, where `HH`
//! is the XOR of every body byte as two uppercase hex digits. The body is a
//! comma separated list whose first field is a three letter tag. Frames sent
//! by the host end with `\n`; the firmware ends its own with `\r\n`.

use crate::config::{PulseConfig, SweepConfig, VoltammetryType};
use crate::sample::Sample;
use std::fmt;
use std::str::FromStr;

/// Errors raised while decoding frames, commands, or device messages.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// The line is missing the leading '$'.
    #[error("frame does not start with '$'")]
    MissingStart,
    /// The line has no '*' before the checksum.
    #[error("frame has no checksum separator")]
    MissingChecksum,
    /// The checksum is not exactly two hex digits.
    #[error("invalid checksum digits '{0}'")]
    InvalidChecksum(String),
    /// The checksum does not match the body.
    #[error("checksum mismatch: frame carries {found:02X}, body gives {expected:02X}")]
    ChecksumMismatch { expected: u8, found: u8 },
    /// The command tag is not one the firmware knows.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// The command has the wrong number of parameters.
    #[error("command {tag} expects {expected} parameters, got {found}")]
    ParameterCount {
        tag: String,
        expected: usize,
        found: usize,
    },
    /// A command parameter is not a valid integer.
    #[error("invalid parameter '{0}'")]
    InvalidParameter(String),
    /// A data message does not hold a potential and a current.
    #[error("malformed point '{0}'")]
    MalformedPoint(String),
}

/// XOR checksum of a frame body.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Wrap a body into a host frame, newline included.
pub fn encode_frame(body: &str) -> String {
    format!("${}*{:02X}\n", body, checksum(body))
}

/// Validate a received frame and return its body.
///
/// Trailing whitespace (the firmware's `\r\n`) is ignored.
pub fn decode_frame(line: &str) -> Result<&str, ProtocolError> {
    let frame = line.trim_end();
    let inner = frame.strip_prefix('$').ok_or(ProtocolError::MissingStart)?;
    let (body, digits) = inner.rsplit_once('*').ok_or(ProtocolError::MissingChecksum)?;

    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidChecksum(digits.to_string()));
    }
    let found = u8::from_str_radix(digits, 16)
        .map_err(|_| ProtocolError::InvalidChecksum(digits.to_string()))?;

    let expected = checksum(body);
    if expected != found {
        return Err(ProtocolError::ChecksumMismatch { expected, found });
    }

    Ok(body)
}

/// Commands understood by the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CMD,CUR,<uA>`: select the transimpedance range.
    SetCurrentRange { microamps: u32 },
    /// `CVW,...`: cyclic voltammetry.
    CyclicVoltammetry {
        settling_ms: u32,
        start_mv: i32,
        end_mv: i32,
        scan_rate_mv_s: u32,
        step_mv: i32,
        cycles: u32,
    },
    /// `DPV,...`: differential pulse voltammetry.
    DifferentialPulse {
        settling_ms: u32,
        start_mv: i32,
        end_mv: i32,
        pulse_mv: i32,
        step_mv: i32,
        pulse_width_ms: u32,
        base_width_ms: u32,
        sample_period_pulse_ms: u32,
        sample_period_base_ms: u32,
    },
    /// `SWV,...`: square wave voltammetry.
    SquareWave {
        settling_ms: u32,
        start_mv: i32,
        end_mv: i32,
        scan_rate_mv_s: u32,
        pulse_mv: i32,
        pulse_frequency_hz: u32,
        sample_period_pulse_ms: u32,
    },
}

impl Command {
    /// The sweep command for the configured voltammetry type.
    pub fn for_sweep(sweep: &SweepConfig, pulse: &PulseConfig) -> Self {
        match sweep.voltammetry_type {
            VoltammetryType::Cyclic => Command::CyclicVoltammetry {
                settling_ms: sweep.settling_time_milliseconds,
                start_mv: sweep.starting_potential_millivolts,
                end_mv: sweep.ending_potential_millivolts,
                scan_rate_mv_s: sweep.scan_rate_millivolts_per_second,
                step_mv: sweep.step_size_millivolts,
                cycles: sweep.number_of_cycles,
            },
            VoltammetryType::DifferentialPulse => Command::DifferentialPulse {
                settling_ms: sweep.settling_time_milliseconds,
                start_mv: sweep.starting_potential_millivolts,
                end_mv: sweep.ending_potential_millivolts,
                pulse_mv: pulse.pulse_potential_millivolts,
                step_mv: sweep.step_size_millivolts,
                pulse_width_ms: pulse.pulse_width_milliseconds,
                base_width_ms: pulse.base_width_milliseconds,
                sample_period_pulse_ms: pulse.sample_period_pulse_milliseconds,
                sample_period_base_ms: pulse.sample_period_base_milliseconds,
            },
            VoltammetryType::SquareWave => Command::SquareWave {
                settling_ms: sweep.settling_time_milliseconds,
                start_mv: sweep.starting_potential_millivolts,
                end_mv: sweep.ending_potential_millivolts,
                scan_rate_mv_s: sweep.scan_rate_millivolts_per_second,
                pulse_mv: pulse.pulse_potential_millivolts,
                pulse_frequency_hz: pulse.pulse_frequency_hertz,
                sample_period_pulse_ms: pulse.sample_period_pulse_milliseconds,
            },
        }
    }

    /// The complete line written to the port.
    pub fn frame(&self) -> String {
        encode_frame(&self.to_string())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetCurrentRange { microamps } => write!(f, "CMD,CUR,{}", microamps),
            Command::CyclicVoltammetry {
                settling_ms,
                start_mv,
                end_mv,
                scan_rate_mv_s,
                step_mv,
                cycles,
            } => write!(
                f,
                "CVW,{},{},{},{},{},{}",
                settling_ms, start_mv, end_mv, scan_rate_mv_s, step_mv, cycles
            ),
            Command::DifferentialPulse {
                settling_ms,
                start_mv,
                end_mv,
                pulse_mv,
                step_mv,
                pulse_width_ms,
                base_width_ms,
                sample_period_pulse_ms,
                sample_period_base_ms,
            } => write!(
                f,
                "DPV,{},{},{},{},{},{},{},{},{}",
                settling_ms,
                start_mv,
                end_mv,
                pulse_mv,
                step_mv,
                pulse_width_ms,
                base_width_ms,
                sample_period_pulse_ms,
                sample_period_base_ms
            ),
            Command::SquareWave {
                settling_ms,
                start_mv,
                end_mv,
                scan_rate_mv_s,
                pulse_mv,
                pulse_frequency_hz,
                sample_period_pulse_ms,
            } => write!(
                f,
                "SWV,{},{},{},{},{},{},{}",
                settling_ms,
                start_mv,
                end_mv,
                scan_rate_mv_s,
                pulse_mv,
                pulse_frequency_hz,
                sample_period_pulse_ms
            ),
        }
    }
}

/// Decodes a command body, the inverse of its `Display` form.
impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(body: &str) -> Result<Self, Self::Err> {
        let mut fields = body.split(',');
        let tag = fields.next().unwrap_or_default();
        let params: Vec<&str> = fields.collect();

        match tag {
            "CMD" => match params.as_slice() {
                ["CUR", microamps] => Ok(Command::SetCurrentRange {
                    microamps: parameter(microamps)?,
                }),
                _ => Err(ProtocolError::UnknownCommand(body.to_string())),
            },
            "CVW" => {
                expect_count(tag, &params, 6)?;
                Ok(Command::CyclicVoltammetry {
                    settling_ms: parameter(params[0])?,
                    start_mv: parameter(params[1])?,
                    end_mv: parameter(params[2])?,
                    scan_rate_mv_s: parameter(params[3])?,
                    step_mv: parameter(params[4])?,
                    cycles: parameter(params[5])?,
                })
            }
            "DPV" => {
                expect_count(tag, &params, 9)?;
                Ok(Command::DifferentialPulse {
                    settling_ms: parameter(params[0])?,
                    start_mv: parameter(params[1])?,
                    end_mv: parameter(params[2])?,
                    pulse_mv: parameter(params[3])?,
                    step_mv: parameter(params[4])?,
                    pulse_width_ms: parameter(params[5])?,
                    base_width_ms: parameter(params[6])?,
                    sample_period_pulse_ms: parameter(params[7])?,
                    sample_period_base_ms: parameter(params[8])?,
                })
            }
            "SWV" => {
                expect_count(tag, &params, 7)?;
                Ok(Command::SquareWave {
                    settling_ms: parameter(params[0])?,
                    start_mv: parameter(params[1])?,
                    end_mv: parameter(params[2])?,
                    scan_rate_mv_s: parameter(params[3])?,
                    pulse_mv: parameter(params[4])?,
                    pulse_frequency_hz: parameter(params[5])?,
                    sample_period_pulse_ms: parameter(params[6])?,
                })
            }
            _ => Err(ProtocolError::UnknownCommand(tag.to_string())),
        }
    }
}

fn expect_count(tag: &str, params: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if params.len() != expected {
        return Err(ProtocolError::ParameterCount {
            tag: tag.to_string(),
            expected,
            found: params.len(),
        });
    }
    Ok(())
}

fn parameter<T: FromStr>(field: &str) -> Result<T, ProtocolError> {
    field
        .parse()
        .map_err(|_| ProtocolError::InvalidParameter(field.to_string()))
}

/// Messages emitted by the firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `MSG,RDY`: sent once after the port opens.
    Ready,
    /// `MSG,END`: the sweep is over.
    End,
    /// Any other `MSG,...`, e.g. a command acknowledgement.
    Status(String),
    /// `ERR,<code>`: the firmware refused a command or aborted a sweep.
    Error(String),
    /// `<TAG>,<mV>,<uA>`: one measured point.
    Point(Sample),
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(body: &str) -> Result<Self, Self::Err> {
        let (tag, rest) = match body.split_once(',') {
            Some((tag, rest)) => (tag, Some(rest)),
            None => (body, None),
        };

        match (tag, rest) {
            ("MSG", Some("RDY")) => Ok(Message::Ready),
            ("MSG", Some("END")) => Ok(Message::End),
            ("MSG", rest) => Ok(Message::Status(rest.unwrap_or_default().to_string())),
            ("ERR", rest) => Ok(Message::Error(rest.unwrap_or_default().to_string())),
            (tag, Some(rest)) if !tag.is_empty() => parse_point(rest)
                .map(Message::Point)
                .ok_or_else(|| ProtocolError::MalformedPoint(body.to_string())),
            _ => Err(ProtocolError::MalformedPoint(body.to_string())),
        }
    }
}

fn parse_point(fields: &str) -> Option<Sample> {
    let (potential, current) = fields.split_once(',')?;
    let potential: f64 = potential.trim().parse().ok()?;
    let current: f64 = current.trim().parse().ok()?;

    if !potential.is_finite() || !current.is_finite() {
        return None;
    }
    Some(Sample::new(potential, current))
}
