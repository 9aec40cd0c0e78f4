use crate::protocol::ProtocolError;

/// Errors raised while talking to the board.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The serial port could not be opened. Usually unplugged or busy.
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// The system's serial ports could not be listed.
    #[error("could not enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),

    /// Reading or writing the port failed after it was opened.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reply expected by the handshake or a command never came.
    #[error("no response from the device within {0:?}")]
    NoResponse(std::time::Duration),

    /// A reply arrived but could not be decoded.
    #[error("corrupted reply from the device: {0}")]
    Protocol(#[from] ProtocolError),

    /// The board answered the handshake with something other than ready.
    #[error("device is not ready, it sent '{0}'")]
    NotReady(String),

    /// The firmware declined a command.
    #[error("device rejected '{command}' with error {code}")]
    Rejected { command: String, code: String },

    /// The firmware reported an error in the middle of a sweep.
    #[error("device reported error {0} during the sweep")]
    Reported(String),
}
