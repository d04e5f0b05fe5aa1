mod cli;

use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{generate, shells::Bash};
use log::{error, info};

use syrpump_utils::connection::{Connection, Response};
use syrpump_utils::cycle::{CycleSpec, Direction, Sequencer};
use syrpump_utils::port::NativePort;
use syrpump_utils::token::CancelToken;

use cli::{Cli, Commands, StructOpt};

enum OutputFormat {
    Plain,
    Json,
}

fn format_response(response: Response, fmt: &OutputFormat) -> String {
    match fmt {
        OutputFormat::Plain => response.lines().join("\n"),
        OutputFormat::Json => json::stringify(response.into_lines()),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_cycle(
    conn: Connection<NativePort>,
    volume: f64,
    rate: f64,
    cycles: u32,
    direction: Direction,
    diameter: f64,
    poll_ms: u64,
    timeout_s: Option<u64>,
    name: Option<String>,
) -> Result<String> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    if let Some(name) = name {
        info!("experiment: {}", name);
    }

    let spec = CycleSpec {
        volume,
        rate,
        cycles,
        direction,
    };
    let mut sequencer = Sequencer::new(conn)
        .diameter(diameter)
        .poll_interval(Duration::from_millis(poll_ms))
        .poll_timeout(timeout_s.map(Duration::from_secs))
        .cancel_token(token);

    sequencer.run(&spec)?;
    Ok(String::new())
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(Bash, &mut Cli::command(), "syrpump-tool", &mut io::stdout());

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_target(false)
    .init();

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };

    let mut conn = Connection::open(&cli.port, cli.baudrate, cli.force)?
        .address(cli.address)
        .mode(cli.mode)
        .settle(Duration::from_millis(cli.settle_ms));

    match cli.command {
        Commands::Start => Ok(format_response(conn.start()?, &fmt)),
        Commands::Stop => Ok(format_response(conn.stop()?, &fmt)),
        Commands::Pause => Ok(format_response(conn.pause()?, &fmt)),
        Commands::Restart => Ok(format_response(conn.restart()?, &fmt)),
        Commands::Status => Ok(format_response(conn.get_status()?, &fmt)),
        Commands::Params => Ok(format_response(conn.get_parameters()?, &fmt)),
        Commands::Limits => Ok(format_response(conn.get_parameter_limits()?, &fmt)),
        Commands::Dispensed => Ok(format_response(conn.get_dispensed_volume()?, &fmt)),
        Commands::Elapsed => Ok(format_response(conn.get_elapsed_time()?, &fmt)),
        Commands::SetRate { rate } => Ok(format_response(conn.set_rate(rate)?, &fmt)),
        Commands::SetVolume { volume } => Ok(format_response(conn.set_volume(volume)?, &fmt)),
        Commands::SetDiameter { diameter } => {
            Ok(format_response(conn.set_diameter(diameter)?, &fmt))
        }
        Commands::SetDelay { delay } => Ok(format_response(conn.set_delay(delay)?, &fmt)),
        Commands::SetTime { time } => Ok(format_response(conn.set_time(time)?, &fmt)),
        Commands::SetUnits { units } => Ok(format_response(conn.set_units(units)?, &fmt)),
        Commands::Cycle {
            volume,
            rate,
            cycles,
            direction,
            diameter,
            poll_ms,
            timeout_s,
            name,
        } => cmd_cycle(
            conn, volume, rate, cycles, direction, diameter, poll_ms, timeout_s, name,
        ),
    }
}

fn main() {
    match do_main() {
        Ok(s) => {
            if !s.is_empty() {
                println!("{}", s);
            }
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
