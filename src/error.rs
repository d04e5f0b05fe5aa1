use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PumpError>;

#[derive(Error, Debug)]
pub enum PumpError {
    #[error("can't open {port_name:?}: {source}")]
    Open {
        port_name: String,
        source: serialport::Error,
    },
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
    #[error("connection is closed")]
    NotConnected,
    #[error("serial i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("undecodable response: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cancelled while waiting for the pump")]
    Cancelled,
    #[error("pump still running after {0:?}")]
    PollTimeout(Duration),
}
