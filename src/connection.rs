//! Command/response exchange with the pump over a line-buffered byte
//! stream.
//!
//! The device offers no acknowledgement framing, length prefix or checksum;
//! a fixed settle delay between write and read is the only synchronization
//! there is. [`Connection`] is generic over the stream so the protocol can
//! be exercised against an in-memory channel.

use std::io::{self, Read, Write};
use std::string::FromUtf8Error;
use std::thread;
use std::time::Duration;

use log::debug;
use serialport::ClearBuffer;

use crate::cmd::{Command, VolumeUnits};
use crate::error::{PumpError, Result};
use crate::port::{self, NativePort};

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Decoded lines returned by the device for one command.
///
/// May be empty: the pump often has nothing buffered inside the read
/// window, and callers must treat that as "no data yet", not as failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    lines: Vec<String>,
}

impl Response {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// Whether a status query reply reports the pump in motion.
    ///
    /// The status line arrives as one element of the form
    /// `pump status<CR><flag>`; the flag is the second `\r`-separated
    /// token and `1` means running.
    pub fn is_running(&self) -> bool {
        match self.lines.first() {
            Some(line) => {
                let mut tokens = line.split('\r');
                tokens.next();
                tokens.next() == Some("1")
            }
            None => false,
        }
    }
}

impl From<Vec<String>> for Response {
    fn from(lines: Vec<String>) -> Self {
        Response { lines }
    }
}

pub struct Connection<T> {
    stream: Option<T>,
    address: u8,
    mode: u8,
    settle: Duration,
}

impl Connection<NativePort> {
    /// Opens the serial device and primes the line buffer: one status
    /// exchange, then both FIFOs are discarded so the first real command
    /// starts from a clean buffer.
    pub fn open(port_name: &str, baudrate: u32, force: bool) -> Result<Self> {
        let port = port::open_port(port_name, baudrate, force)?;
        let mut conn = Connection::new(port);
        conn.get_status()?;
        if let Some(port) = conn.stream.as_ref() {
            port.clear(ClearBuffer::All)?;
        }
        Ok(conn)
    }
}

impl<T: Read + Write> Connection<T> {
    pub fn new(stream: T) -> Self {
        Connection {
            stream: Some(stream),
            address: 0,
            mode: 0,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Pump address prepended to start/stop/pause. Zero means unaddressed.
    pub fn address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Mode suffix appended to start. Zero means the device default.
    pub fn mode(mut self, mode: u8) -> Self {
        self.mode = mode;
        self
    }

    /// Delay between writing a command and reading its response.
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Releases the channel. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("connection closed");
        }
    }

    /// Writes one encoded command line, sleeps the settle delay, then
    /// drains the response. A write failure closes the channel.
    pub fn send(&mut self, command: &Command) -> Result<Response> {
        let line = command.encode(self.address, self.mode);
        debug!("send {:?}", line);

        let stream = self.stream.as_mut().ok_or(PumpError::NotConnected)?;
        let written = stream.write_all(line.as_bytes()).and_then(|()| stream.flush());
        if let Err(e) = written {
            self.close();
            return Err(e.into());
        }

        thread::sleep(self.settle);
        self.receive()
    }

    /// One non-blocking bulk read of whatever complete lines the device
    /// has buffered. No data inside the read window is an empty response,
    /// not an error; undecodable bytes close the channel.
    pub fn receive(&mut self) -> Result<Response> {
        let stream = self.stream.as_mut().ok_or(PumpError::NotConnected)?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        let drained = loop {
            match stream.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    break Ok(())
                }
                Err(e) => break Err(e),
            }
        };
        if let Err(e) = drained {
            self.close();
            return Err(e.into());
        }

        match decode_lines(&buf) {
            Ok(lines) => {
                for line in &lines {
                    debug!("recv {:?}", line);
                }
                Ok(Response { lines })
            }
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    pub fn start(&mut self) -> Result<Response> {
        self.send(&Command::Start)
    }

    pub fn stop(&mut self) -> Result<Response> {
        self.send(&Command::Stop)
    }

    pub fn pause(&mut self) -> Result<Response> {
        self.send(&Command::Pause)
    }

    pub fn restart(&mut self) -> Result<Response> {
        self.send(&Command::Restart)
    }

    pub fn set_units(&mut self, units: VolumeUnits) -> Result<Response> {
        self.send(&Command::SetUnits(units))
    }

    pub fn set_diameter(&mut self, mm: f64) -> Result<Response> {
        self.send(&Command::SetDiameter(mm))
    }

    pub fn set_rate(&mut self, rate: f64) -> Result<Response> {
        self.send(&Command::SetRate(rate))
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<Response> {
        self.send(&Command::SetVolume(volume))
    }

    pub fn set_delay(&mut self, delay: f64) -> Result<Response> {
        self.send(&Command::SetDelay(delay))
    }

    pub fn set_time(&mut self, time: f64) -> Result<Response> {
        self.send(&Command::SetTime(time))
    }

    pub fn get_parameter_limits(&mut self) -> Result<Response> {
        self.send(&Command::GetParameterLimits)
    }

    pub fn get_parameters(&mut self) -> Result<Response> {
        self.send(&Command::GetParameters)
    }

    pub fn get_dispensed_volume(&mut self) -> Result<Response> {
        self.send(&Command::GetDispensedVolume)
    }

    pub fn get_elapsed_time(&mut self) -> Result<Response> {
        self.send(&Command::GetElapsedTime)
    }

    pub fn get_status(&mut self) -> Result<Response> {
        self.send(&Command::GetStatus)
    }
}

/// Splits the drained buffer on `\n` and trims stray `\r`/`\n` from the
/// ends of each line. Carriage returns inside a line are preserved; the
/// status flag rides behind one.
fn decode_lines(buf: &[u8]) -> std::result::Result<Vec<String>, FromUtf8Error> {
    let mut lines = Vec::new();
    let mut pieces = buf.split(|&b| b == b'\n').peekable();
    while let Some(piece) = pieces.next() {
        if piece.is_empty() && pieces.peek().is_none() {
            break;
        }
        let text = String::from_utf8(piece.to_vec())?;
        lines.push(text.trim_matches(|c| c == '\r' || c == '\n').to_string());
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockStream {
        input: io::Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl MockStream {
        fn with_input(input: &[u8]) -> Self {
            MockStream {
                input: io::Cursor::new(input.to_vec()),
                written: Vec::new(),
            }
        }

        fn empty() -> Self {
            Self::with_input(&[])
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_conn(stream: MockStream) -> Connection<MockStream> {
        Connection::new(stream).settle(Duration::ZERO)
    }

    #[test]
    fn receive_nothing_is_empty_response() {
        let mut conn = test_conn(MockStream::empty());
        let response = conn.receive().unwrap();
        assert!(response.is_empty());
        assert!(conn.is_open());
    }

    #[test]
    fn receive_strips_line_endings() {
        let mut conn = test_conn(MockStream::with_input(b"pump status\r1\r\nok\r\n"));
        let response = conn.receive().unwrap();
        assert_eq!(response.lines(), ["pump status\r1", "ok"]);
    }

    #[test]
    fn receive_keeps_partial_last_line() {
        let mut conn = test_conn(MockStream::with_input(b"first\r\nsecond"));
        let response = conn.receive().unwrap();
        assert_eq!(response.lines(), ["first", "second"]);
    }

    #[test]
    fn receive_bad_bytes_closes_channel() {
        let mut conn = test_conn(MockStream::with_input(&[0xff, 0xfe, b'\n']));
        assert!(matches!(conn.receive(), Err(PumpError::Decode(_))));
        assert!(!conn.is_open());
        assert!(matches!(conn.receive(), Err(PumpError::NotConnected)));
    }

    #[test]
    fn send_writes_terminated_line() {
        let mut conn = test_conn(MockStream::empty());
        let response = conn.send(&Command::SetRate(15.0)).unwrap();
        assert!(response.is_empty());
        assert_eq!(conn.stream.as_ref().unwrap().written, b"set rate 15\r");
    }

    #[test]
    fn send_applies_address_and_mode() {
        let mut conn = test_conn(MockStream::empty()).address(2).mode(3);
        conn.start().unwrap();
        assert_eq!(conn.stream.as_ref().unwrap().written, b"2 start 2\r");
    }

    #[test]
    fn close_is_idempotent() {
        let mut conn = test_conn(MockStream::empty());
        conn.close();
        conn.close();
        assert!(!conn.is_open());
    }

    #[test]
    fn status_running_flag() {
        let running = Response::from(vec!["pump status\r1".to_string()]);
        let idle = Response::from(vec!["pump status\r0".to_string()]);
        let empty = Response::default();
        assert!(running.is_running());
        assert!(!idle.is_running());
        assert!(!empty.is_running());
    }
}
