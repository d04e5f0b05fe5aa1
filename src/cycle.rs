//! Multi-phase push/pull dispensing cycles.
//!
//! A [`Sequencer`] holds a [`Connection`] and drives one experiment: set
//! the syringe up once, then start a motion phase, poll the pump until it
//! goes idle, flip direction, repeat. Cancellation is observed at the poll
//! boundary and stops the pump before aborting the whole sequence.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::connection::Connection;
use crate::error::{PumpError, Result};
use crate::token::CancelToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Factory default of the syringe actually mounted on the rig, mm.
pub const DEFAULT_SYRINGE_DIAMETER: f64 = 28.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
}

impl Direction {
    /// Sign carried by the rate: pushing dispenses, pulling draws.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Push => 1.0,
            Direction::Pull => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
        }
    }
}

impl FromStr for Direction {
    type Err = PumpError;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "push" => Ok(Direction::Push),
            "pull" => Ok(Direction::Pull),
            other => Err(PumpError::InvalidArgument(format!(
                "bad direction '{}' (expected push or pull)",
                other
            ))),
        }
    }
}

/// Parameters of one experiment run. Immutable for its duration; the
/// per-phase sign flip is computed, never written back.
#[derive(Debug, Clone)]
pub struct CycleSpec {
    /// Volume dispensed or drawn per phase.
    pub volume: f64,
    /// Rate magnitude; the sequencer applies the sign.
    pub rate: f64,
    /// Number of motion phases, at least 1.
    pub cycles: u32,
    /// Direction of the first phase.
    pub direction: Direction,
}

impl CycleSpec {
    pub fn validate(&self) -> Result<()> {
        if self.cycles < 1 {
            return Err(PumpError::InvalidArgument(
                "cycle count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Sequencer<T> {
    conn: Connection<T>,
    diameter: f64,
    poll_interval: Duration,
    poll_timeout: Option<Duration>,
    cancel: CancelToken,
}

impl<T: Read + Write> Sequencer<T> {
    pub fn new(conn: Connection<T>) -> Self {
        Sequencer {
            conn,
            diameter: DEFAULT_SYRINGE_DIAMETER,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Syringe diameter sent during the configure step, mm.
    pub fn diameter(mut self, mm: f64) -> Self {
        self.diameter = mm;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up on a phase that is still running after this long. The
    /// default is to poll forever, like the pump's own front panel.
    pub fn poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.conn
    }

    pub fn into_connection(self) -> Connection<T> {
        self.conn
    }

    /// Runs the experiment: configure once, then start/poll each phase,
    /// alternating direction. Validation happens before anything is sent
    /// to the pump.
    pub fn run(&mut self, spec: &CycleSpec) -> Result<()> {
        spec.validate()?;

        info!(
            "cycle sequence: volume={:.3} rate={:.3} cycles={} direction={}",
            spec.volume, spec.rate, spec.cycles, spec.direction
        );

        self.conn.set_diameter(self.diameter)?;
        self.conn.set_volume(spec.volume)?;

        let mut rate = spec.rate.abs() * spec.direction.sign();
        for phase in 1..=spec.cycles {
            if phase > 1 {
                rate = -rate;
            }
            self.conn.set_rate(rate)?;
            self.conn.start()?;
            info!("phase {}/{}: pump started at {:.2} mL/min", phase, spec.cycles, rate);
            self.wait_idle()?;
        }

        info!("sequence finished");
        Ok(())
    }

    /// Polls the status query until the pump leaves the running state.
    fn wait_idle(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return self.interrupt();
            }
            if !self.conn.get_status()?.is_running() {
                return Ok(());
            }
            if let Some(limit) = self.poll_timeout {
                if started.elapsed() >= limit {
                    return Err(PumpError::PollTimeout(limit));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Best-effort stop, then abort the whole sequence. A failed stop is
    /// only logged; the pump may already be unreachable.
    fn interrupt(&mut self) -> Result<()> {
        warn!("cancellation requested, stopping pump");
        if let Err(e) = self.conn.stop() {
            warn!("failed to stop pump: {}", e);
        }
        Err(PumpError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    /// In-memory pump that replies to status queries from a script:
    /// each start arms `running_polls` running replies before idle.
    #[derive(Default)]
    struct PumpState {
        running_polls: usize,
        running_left: usize,
        status_queries: usize,
        writes: Vec<String>,
        pending: Vec<u8>,
        cancel_on_query: Option<(usize, CancelToken)>,
    }

    struct ScriptedPump(Rc<RefCell<PumpState>>);

    impl Read for ScriptedPump {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.0.borrow_mut();
            if state.pending.is_empty() {
                return Ok(0);
            }
            let n = state.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&state.pending[..n]);
            state.pending.drain(..n);
            Ok(n)
        }
    }

    impl Write for ScriptedPump {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut state = self.0.borrow_mut();
            let line = String::from_utf8(buf.to_vec())
                .unwrap()
                .trim_end_matches('\r')
                .to_string();

            if line.ends_with("start") {
                state.running_left = state.running_polls;
            } else if line.ends_with("stop") {
                state.running_left = 0;
            } else if line == "pump status" {
                state.status_queries += 1;
                let flag = if state.running_left > 0 {
                    state.running_left -= 1;
                    "1"
                } else {
                    "0"
                };
                state.pending = format!("pump status\r{}\r\n", flag).into_bytes();
                if let Some((after, token)) = &state.cancel_on_query {
                    if state.status_queries >= *after {
                        token.cancel();
                    }
                }
            }

            state.writes.push(line);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn scripted(running_polls: usize) -> (Sequencer<ScriptedPump>, Rc<RefCell<PumpState>>) {
        let state = Rc::new(RefCell::new(PumpState {
            running_polls,
            ..PumpState::default()
        }));
        let conn = Connection::new(ScriptedPump(state.clone())).settle(Duration::ZERO);
        let seq = Sequencer::new(conn).poll_interval(Duration::ZERO);
        (seq, state)
    }

    fn spec(cycles: u32, direction: Direction) -> CycleSpec {
        CycleSpec {
            volume: 20.0,
            rate: 15.0,
            cycles,
            direction,
        }
    }

    #[test]
    fn polls_until_idle() {
        let (mut seq, state) = scripted(3);
        seq.run(&spec(1, Direction::Push)).unwrap();
        // three running replies, then the idle one
        assert_eq!(state.borrow().status_queries, 4);
    }

    #[test]
    fn configures_before_first_phase() {
        let (mut seq, state) = scripted(0);
        seq.run(&spec(1, Direction::Push)).unwrap();
        let state = state.borrow();
        assert_eq!(state.writes[0], "set diameter 28.6");
        assert_eq!(state.writes[1], "set volume 20");
        assert_eq!(state.writes[2], "set rate 15");
        assert_eq!(state.writes[3], "start");
    }

    #[test]
    fn alternates_signed_rate() {
        let (mut seq, state) = scripted(1);
        seq.run(&spec(3, Direction::Pull)).unwrap();
        let rates: Vec<String> = state
            .borrow()
            .writes
            .iter()
            .filter(|w| w.starts_with("set rate"))
            .cloned()
            .collect();
        assert_eq!(rates, ["set rate -15", "set rate 15", "set rate -15"]);
    }

    #[test]
    fn zero_cycles_rejected_without_io() {
        let (mut seq, state) = scripted(0);
        let result = seq.run(&spec(0, Direction::Push));
        assert!(matches!(result, Err(PumpError::InvalidArgument(_))));
        assert!(state.borrow().writes.is_empty());
    }

    #[test]
    fn direction_parses() {
        assert_eq!("push".parse::<Direction>().unwrap(), Direction::Push);
        assert_eq!("pull".parse::<Direction>().unwrap(), Direction::Pull);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(PumpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cancellation_stops_once_and_aborts() {
        let (seq, state) = scripted(usize::MAX);
        let token = CancelToken::new();
        state.borrow_mut().cancel_on_query = Some((2, token.clone()));
        let mut seq = seq.cancel_token(token);

        let result = seq.run(&spec(3, Direction::Push));
        assert!(matches!(result, Err(PumpError::Cancelled)));

        let state = state.borrow();
        let stops = state.writes.iter().filter(|w| *w == "stop").count();
        let starts = state.writes.iter().filter(|w| *w == "start").count();
        assert_eq!(stops, 1);
        assert_eq!(starts, 1);
    }

    #[test]
    fn poll_timeout_surfaces() {
        let (seq, _state) = scripted(usize::MAX);
        let mut seq = seq.poll_timeout(Some(Duration::ZERO));
        let result = seq.run(&spec(1, Direction::Push));
        assert!(matches!(result, Err(PumpError::PollTimeout(_))));
    }
}
