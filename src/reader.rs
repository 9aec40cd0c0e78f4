//! Sweep response reader.
//!
//! [`ResponseReader`] turns the lines of a [`LineSource`] into samples and
//! stops on the end-of-sweep message, on a device error, or when the device
//! has been silent for too long.

use crate::error::DeviceError;
use crate::link::LineSource;
use crate::protocol::{decode_frame, Message};
use crate::sample::Sample;
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Where the reader is in a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Nothing has been read yet.
    Idle,
    /// Samples are arriving.
    Awaiting,
    /// The device sent the end-of-sweep message.
    Done,
    /// The device went quiet, or the sweep outlived its deadline.
    TimedOut,
    /// The port failed or the device reported an error.
    Failed,
    /// The host ended the sweep before the device did.
    Stopped,
}

impl ReaderState {
    /// True once no more samples will be produced.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ReaderState::Done
                | ReaderState::TimedOut
                | ReaderState::Failed
                | ReaderState::Stopped
        )
    }
}

/// Lazy, finite sequence of samples read from a sweep.
///
/// Malformed lines are logged and skipped. A device error or I/O failure is
/// yielded once as `Err`, after which the iterator ends.
pub struct ResponseReader<'a, S> {
    source: &'a mut S,
    state: ReaderState,
    idle_timeout: Duration,
    deadline: Option<Duration>,
    started: Instant,
    last_activity: Instant,
    skipped: usize,
}

impl<'a, S: LineSource> ResponseReader<'a, S> {
    pub fn new(source: &'a mut S, idle_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            source,
            state: ReaderState::Idle,
            idle_timeout,
            deadline: None,
            started: now,
            last_activity: now,
            skipped: 0,
        }
    }

    /// Bound the whole sweep, counted from the first poll.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Number of lines dropped because they could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// End the sweep early. No-op once the reader has finished.
    pub fn stop(&mut self) {
        if !self.state.is_finished() {
            self.state = ReaderState::Stopped;
        }
    }

    fn timed_out(&self, now: Instant) -> bool {
        if now.duration_since(self.last_activity) >= self.idle_timeout {
            warn!(
                "no data from the device for {:?}, ending the sweep",
                self.idle_timeout
            );
            return true;
        }
        match self.deadline {
            Some(deadline) if now.duration_since(self.started) >= deadline => {
                warn!("sweep exceeded its {:?} deadline without an end message", deadline);
                true
            }
            _ => false,
        }
    }

    /// Interpret one line. `None` means keep reading.
    fn interpret(&mut self, line: &str) -> Option<Result<Sample, DeviceError>> {
        if line.trim().is_empty() {
            return None;
        }

        let message = match decode_frame(line).and_then(|body| body.parse::<Message>()) {
            Ok(message) => message,
            Err(e) => {
                self.skipped += 1;
                warn!("skipping line '{}': {}", line, e);
                return None;
            }
        };

        match message {
            Message::Point(sample) => Some(Ok(sample)),
            Message::End => {
                info!("sweep complete");
                self.state = ReaderState::Done;
                None
            }
            Message::Error(code) => {
                self.state = ReaderState::Failed;
                Some(Err(DeviceError::Reported(code)))
            }
            Message::Ready | Message::Status(_) => {
                debug!("ignoring status message '{}'", line);
                None
            }
        }
    }
}

impl<S: LineSource> Iterator for ResponseReader<'_, S> {
    type Item = Result<Sample, DeviceError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ReaderState::Idle => {
                let now = Instant::now();
                self.started = now;
                self.last_activity = now;
                self.state = ReaderState::Awaiting;
            }
            ReaderState::Awaiting => {}
            ReaderState::Done
            | ReaderState::TimedOut
            | ReaderState::Failed
            | ReaderState::Stopped => return None,
        }

        loop {
            if self.timed_out(Instant::now()) {
                self.state = ReaderState::TimedOut;
                return None;
            }

            let line = match self.source.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(e) => {
                    self.state = ReaderState::Failed;
                    return Some(Err(DeviceError::Io(e)));
                }
            };
            self.last_activity = Instant::now();

            if let Some(item) = self.interpret(&line) {
                return Some(item);
            }
            if self.state.is_finished() {
                return None;
            }
        }
    }
}
