use core::time::Duration;

use log::debug;
use serialport::{self, SerialPort};

use crate::error::{PumpError, Result};

pub type NativePort = Box<dyn SerialPort>;

/// Read window for the line-buffered response channel. The pump is never
/// waited on directly; `Connection::send` sleeps a settle delay and then
/// drains whatever the device has buffered, so reads only need to return
/// quickly when nothing is pending.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

pub fn open_port(port_name: &str, baudrate: u32, force: bool) -> Result<NativePort> {
    if !force && is_port_open(port_name) {
        return Err(PumpError::PortBusy {
            port_name: port_name.to_string(),
        });
    }

    let port = serialport::new(port_name, baudrate)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|source| PumpError::Open {
            port_name: port_name.to_string(),
            source,
        })?;

    debug!("open_port OK: {} @ {} baud", port_name, baudrate);
    Ok(port)
}

#[cfg(target_os = "linux")]
fn is_port_open(port_name: &str) -> bool {
    use glob::glob;
    use std::fs;

    glob("/proc/[0-9]*/fd/*")
        .unwrap()
        .filter_map(|p| p.ok())
        .filter_map(|path| fs::read_link(path).ok())
        .any(|link| link.to_str() == Some(port_name))
}

#[cfg(not(target_os = "linux"))]
fn is_port_open(_port_name: &str) -> bool {
    false
}
