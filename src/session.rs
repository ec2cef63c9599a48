use regex::Regex;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::errors::*;
use crate::tcpstream::TransportSession;
use crate::POP3State;

lazy_static! {
    static ref RESPONSE: Regex =
        Regex::new(r"^(?P<status>\+OK|-ERR)(?:\s+(?P<statustext>.*))?$").unwrap();
}

/// A positive server response: the text after `+OK` and, for multi-line
/// commands, the dot-unstuffed body lines without the terminating `.`.
#[derive(Debug)]
pub struct POP3Response {
    pub status_text: String,
    pub lines: Vec<Vec<u8>>,
}

/// Connection state shared between the foreground caller and the keep-alive
/// thread. Always accessed through `lock_session`.
#[derive(Debug)]
pub struct Session {
    state: POP3State,
    transport: Option<TransportSession>,
    last_activity: Instant,
}

/// Lock the session. A panic on another thread while holding the lock does
/// not make the session unreachable; the state is still consistent because
/// every transition is a single assignment.
pub fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    pub fn new() -> Session {
        Session {
            state: POP3State::Disconnected,
            transport: None,
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> POP3State {
        self.state
    }

    pub fn set_state(&mut self, state: POP3State) {
        self.state = state;
        debug!("POP3State::{:?}", self.state);
    }

    pub fn require(&self, expected: POP3State) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ErrorKind::InvalidState(expected, self.state).into())
        }
    }

    pub fn attach(&mut self, transport: TransportSession) {
        self.transport = Some(transport);
        self.last_activity = Instant::now();
        self.set_state(POP3State::Connected);
    }

    pub fn greeting(&self) -> Option<&str> {
        self.transport.as_ref().map(TransportSession::greeting)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Release the transport and forget the session. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if self.state != POP3State::Disconnected {
            self.set_state(POP3State::Disconnected);
        }
    }

    pub fn send_command(&mut self, command: &str, param: Option<&str>) -> Result<POP3Response> {
        // Identify if the command is a multiline command
        let is_multiline = match command {
            "LIST" => param.is_none(),
            "RETR" => true,
            _ => false,
        };

        // Create the actual POP3 Command by appending the parameters
        let line = match param {
            Some(x) => format!("{} {}", command, x),
            None => command.to_string(),
        };

        if command == "PASS" {
            info!("C: PASS ********");
        } else {
            info!("C: {}", line);
        }
        let response = match self.transport.as_mut() {
            Some(transport) => transport
                .send_line(&line)
                .and_then(|_| read_response(transport, is_multiline)),
            None => Err(ErrorKind::ConnectionClosed.into()),
        };
        self.last_activity = Instant::now();
        response
    }

    /// Send QUIT with a short timeout and release the transport whatever the
    /// outcome.
    pub fn quit(&mut self, timeout: Duration) -> Result<()> {
        let mut transport = match self.transport.take() {
            Some(transport) => transport,
            None => {
                self.disconnect();
                return Ok(());
            }
        };
        self.set_state(POP3State::Closing);
        info!("C: QUIT");
        let result = transport
            .set_read_timeout(timeout)
            .and_then(|_| transport.send_line("QUIT"))
            .and_then(|_| read_response(&mut transport, false))
            .map(|_| ());
        if let Err(ref e) = result {
            warn!("QUIT was not acknowledged: {}", e);
        }
        transport.close();
        self.set_state(POP3State::Disconnected);
        result
    }
}

fn read_response(transport: &mut TransportSession, is_multiline: bool) -> Result<POP3Response> {
    //First read the status line
    let status_line = String::from_utf8_lossy(&transport.read_line()?).into_owned();
    info!("S: {}", status_line);

    // Test if the response is positive. Else exit early.
    let response_groups = match RESPONSE.captures(&status_line) {
        Some(groups) => groups,
        None => return Err(ErrorKind::Unparseable(status_line.clone()).into()),
    };
    let status_text = response_groups
        .name("statustext")
        .map_or("", |m| m.as_str())
        .to_string();
    if &response_groups["status"] == "-ERR" {
        return Err(ErrorKind::Negative(status_text).into());
    }

    let mut lines = Vec::new();
    if is_multiline {
        loop {
            let mut line = transport.read_line()?;
            if line == b"." {
                break;
            }
            // Content lines starting with a period arrive dot-stuffed
            if line.starts_with(b"..") {
                line.remove(0);
            }
            lines.push(line);
        }
        trace!("S: <{} lines>", lines.len());
    }
    Ok(POP3Response {
        status_text: status_text,
        lines: lines,
    })
}
