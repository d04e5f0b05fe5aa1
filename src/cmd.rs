//! Wire vocabulary of the pump: one ASCII line per command, terminated by a
//! carriage return.

use std::fmt;
use std::str::FromStr;

use crate::error::PumpError;

/// Dispensing rate units accepted by `set units`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeUnits {
    MlPerMin,
    MlPerHr,
    UlPerMin,
    UlPerHr,
}

impl VolumeUnits {
    /// Numeric code the device expects on the wire.
    pub fn code(&self) -> u8 {
        match self {
            VolumeUnits::MlPerMin => 0,
            VolumeUnits::MlPerHr => 1,
            VolumeUnits::UlPerMin => 2,
            VolumeUnits::UlPerHr => 3,
        }
    }
}

impl fmt::Display for VolumeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeUnits::MlPerMin => write!(f, "mL/min"),
            VolumeUnits::MlPerHr => write!(f, "mL/hr"),
            VolumeUnits::UlPerMin => write!(f, "µL/min"),
            VolumeUnits::UlPerHr => write!(f, "µL/hr"),
        }
    }
}

impl FromStr for VolumeUnits {
    type Err = PumpError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "mL/min" => Ok(VolumeUnits::MlPerMin),
            "mL/hr" => Ok(VolumeUnits::MlPerHr),
            "µL/min" | "uL/min" => Ok(VolumeUnits::UlPerMin),
            "µL/hr" | "uL/hr" => Ok(VolumeUnits::UlPerHr),
            other => Err(PumpError::InvalidArgument(format!(
                "unknown units '{}' (expected mL/min, mL/hr, µL/min or µL/hr)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Pause,
    Restart,
    SetUnits(VolumeUnits),
    SetDiameter(f64),
    SetRate(f64),
    SetVolume(f64),
    SetDelay(f64),
    SetTime(f64),
    GetParameterLimits,
    GetParameters,
    GetDispensedVolume,
    GetElapsedTime,
    GetStatus,
}

impl Command {
    /// Commands that accept the numeric pump-address prefix.
    fn takes_address(&self) -> bool {
        matches!(self, Command::Start | Command::Stop | Command::Pause)
    }

    /// Commands that accept the mode suffix.
    fn takes_mode(&self) -> bool {
        matches!(self, Command::Start)
    }

    /// Serializes the command to the line sent over the wire.
    ///
    /// `address` and `mode` are the connection-level defaults; zero means
    /// "not configured" and adds nothing. A configured mode `n` is sent as
    /// `n - 1`, which is the device's convention.
    pub fn encode(&self, address: u8, mode: u8) -> String {
        let mut line = self.to_string();
        if address != 0 && self.takes_address() {
            line = format!("{} {}", address, line);
        }
        if mode != 0 && self.takes_mode() {
            line = format!("{} {}", line, mode - 1);
        }
        line.push('\r');
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => write!(f, "start"),
            Command::Stop => write!(f, "stop"),
            Command::Pause => write!(f, "pause"),
            Command::Restart => write!(f, "restart"),
            Command::SetUnits(units) => write!(f, "set units {}", units.code()),
            Command::SetDiameter(mm) => write!(f, "set diameter {}", mm),
            Command::SetRate(rate) => write!(f, "set rate {}", rate),
            Command::SetVolume(volume) => write!(f, "set volume {}", volume),
            Command::SetDelay(delay) => write!(f, "set delay {}", delay),
            Command::SetTime(time) => write!(f, "set time {}", time),
            Command::GetParameterLimits => write!(f, "read limit parameter"),
            Command::GetParameters => write!(f, "view parameter"),
            Command::GetDispensedVolume => write!(f, "dispensed volume"),
            Command::GetElapsedTime => write!(f, "elapsed time"),
            Command::GetStatus => write!(f, "pump status"),
        }
    }
}
