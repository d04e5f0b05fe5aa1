pub use clap::StructOpt;
use clap::{Parser, Subcommand};

use syrpump_utils::cmd::VolumeUnits;
use syrpump_utils::cycle::Direction;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip the port busy check
    #[clap(long, short)]
    pub force: bool,

    /// Enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// Serial device of the pump
    #[clap(long, short, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// Serial baud rate
    #[clap(long, short, default_value_t = 115200)]
    pub baudrate: u32,

    /// Pump address (0 = unaddressed)
    #[clap(long, short = 'x', default_value_t = 0)]
    pub address: u8,

    /// Pump mode (0 = device default)
    #[clap(long, short, default_value_t = 0)]
    pub mode: u8,

    /// Settle delay between write and read, milliseconds
    #[clap(long, default_value_t = 500)]
    pub settle_ms: u64,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the pump
    Start,

    /// Stop the pump
    Stop,

    /// Pause the pump
    Pause,

    /// Restart the pump
    Restart,

    /// Query pump status
    Status,

    /// View the configured parameters
    Params,

    /// Read the parameter limits
    Limits,

    /// Query the dispensed volume
    Dispensed,

    /// Query the elapsed time
    Elapsed,

    /// Set the dispensing rate (negative pulls)
    SetRate { rate: f64 },

    /// Set the volume to dispense
    SetVolume { volume: f64 },

    /// Set the syringe diameter, mm
    SetDiameter { diameter: f64 },

    /// Set the start delay
    SetDelay { delay: f64 },

    /// Set the run time
    SetTime { time: f64 },

    /// Set the rate units (mL/min, mL/hr, µL/min, µL/hr)
    SetUnits { units: VolumeUnits },

    /// Run a multi-phase push/pull dispensing cycle
    Cycle {
        /// Volume per phase
        #[clap(long)]
        volume: f64,

        /// Rate magnitude per phase
        #[clap(long)]
        rate: f64,

        /// Number of phases
        #[clap(long, default_value_t = 1)]
        cycles: u32,

        /// Direction of the first phase
        #[clap(long, default_value = "push")]
        direction: Direction,

        /// Syringe diameter, mm
        #[clap(long, default_value_t = 28.6)]
        diameter: f64,

        /// Status poll interval, milliseconds
        #[clap(long, default_value_t = 1000)]
        poll_ms: u64,

        /// Give up on a phase still running after this many seconds
        #[clap(long)]
        timeout_s: Option<u64>,

        /// Experiment name for the log
        #[clap(long)]
        name: Option<String>,
    },
}
