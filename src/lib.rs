//! A POP3 mail retrieval client together with a tolerant MIME decoder.
//!
//! `POP3Connection` drives the protocol over a plain or TLS transport and
//! keeps the session alive while it sits idle. Retrieved messages are turned
//! into an `EmailDocument` by the `mime` module.

#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
extern crate openssl;
extern crate regex;

use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod errors {
    error_chain! {
        foreign_links {
            Io(::std::io::Error);
            SslStack(::openssl::error::ErrorStack);
            SslHandshake(::openssl::ssl::HandshakeError<::std::net::TcpStream>);
            Toml(::toml::de::Error);
        }

        errors {
            Timeout {
                description("timed out waiting for the server")
                display("timed out waiting for the server")
            }
            ConnectionClosed {
                description("connection closed")
                display("connection closed")
            }
            BadGreeting(line: String) {
                description("server greeting was not positive")
                display("server greeting was not positive: {}", line)
            }
            Negative(text: String) {
                description("server answered -ERR")
                display("server answered -ERR: {}", text)
            }
            Unparseable(line: String) {
                description("un-parseable response")
                display("un-parseable response: {}", line)
            }
            InvalidState(expected: crate::POP3State, actual: crate::POP3State) {
                description("command not allowed in the current session state")
                display("command requires POP3State::{:?}, session is POP3State::{:?}", expected, actual)
            }
            Decode(reason: String) {
                description("could not decode data")
                display("could not decode data: {}", reason)
            }
            NothingToSave(what: String) {
                description("nothing to save")
                display("nothing to save: {}", what)
            }
            InvalidConfig(reason: String) {
                description("invalid account configuration")
                display("invalid account configuration: {}", reason)
            }
            LineTooLong(limit: usize) {
                description("server line too long")
                display("server sent a line longer than {} bytes", limit)
            }
        }
    }

    impl Error {
        /// Whether this error came from the connection itself rather than from
        /// the server's answer. Transport errors leave the session unusable.
        pub fn is_transport(&self) -> bool {
            match *self.kind() {
                ErrorKind::Io(_)
                | ErrorKind::SslStack(_)
                | ErrorKind::SslHandshake(_)
                | ErrorKind::Timeout
                | ErrorKind::ConnectionClosed
                | ErrorKind::BadGreeting(_)
                | ErrorKind::LineTooLong(_) => true,
                _ => false,
            }
        }
    }
}
use errors::*;

mod tcpstream;
mod session;
mod keepalive;
pub mod config;
pub mod mime;
pub mod pop3result;
mod pop3resultimpl;
pub mod sink;
pub mod utils;
pub use config::{AccountConfig, Security, Timeouts};
pub use mime::{EmailDocument, MessagePart};
pub use sink::ByteSink;
use keepalive::KeepAlive;
use pop3result::{POP3List, POP3Retr, POP3Stat};
use session::{lock_session, Session};
pub use tcpstream::MAX_LINE_LEN;
use tcpstream::TransportSession;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum POP3State {
    Disconnected,
    Connected,
    Authenticated,
    Closing,
}

/// A single POP3 session against the account's server.
///
/// At most one command is on the wire at any time: foreground calls and the
/// keep-alive probe both go through the same session lock.
pub struct POP3Connection {
    account: AccountConfig,
    session: Arc<Mutex<Session>>,
    keepalive: Option<KeepAlive>,
}

impl POP3Connection {
    pub fn new(account: AccountConfig) -> POP3Connection {
        POP3Connection {
            account: account,
            session: Arc::new(Mutex::new(Session::new())),
            keepalive: None,
        }
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    pub fn state(&self) -> POP3State {
        lock_session(&self.session).state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() != POP3State::Disconnected
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == POP3State::Authenticated
    }

    /// The server's `+OK` greeting line while a transport is open.
    pub fn greeting(&self) -> Option<String> {
        lock_session(&self.session).greeting().map(str::to_owned)
    }

    pub fn keepalive_running(&self) -> bool {
        self.keepalive.as_ref().map_or(false, KeepAlive::is_running)
    }

    pub fn connect(&mut self) -> Result<()> {
        trace!("Initiate POP3 Connection");
        let mut session = lock_session(&self.session);
        session.require(POP3State::Disconnected)?;
        let timeouts = &self.account.timeouts;
        timeouts.validate()?;
        match TransportSession::open(
            &self.account.host,
            self.account.port,
            self.account.security,
            timeouts.read(),
        ) {
            Ok(transport) => {
                session.attach(transport);
                trace!("Connection Established");
                Ok(())
            }
            Err(e) => {
                warn!("Connecting to {}:{} failed: {}", self.account.host, self.account.port, e);
                session.disconnect();
                Err(e)
            }
        }
    }

    /// Log in with USER/PASS. A rejected login leaves the session connected
    /// so that the caller may retry or quit.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        trace!("Attempting to Login");
        {
            let mut session = lock_session(&self.session);
            session.require(POP3State::Connected)?;
            session.send_command("USER", Some(username))?;
            debug!("Plain USER/PASS authentication");
            session.send_command("PASS", Some(password))?;
            session.set_state(POP3State::Authenticated);
        }
        self.start_keepalive();
        Ok(())
    }

    /// `login` with the credentials from the account configuration.
    pub fn authenticate(&mut self) -> Result<()> {
        let username = self.account.username.clone();
        let password = self.account.password.clone();
        self.login(&username, &password)
    }

    pub fn stat(&mut self) -> Result<POP3Stat> {
        trace!("Cmd: STAT");
        self.transact("STAT", None)
            .and_then(|response| POP3Stat::parse(&response.status_text))
    }

    pub fn list(&mut self, msgnum: Option<u32>) -> Result<POP3List> {
        trace!("Cmd: LIST");
        match msgnum {
            Some(x) => self
                .transact("LIST", Some(&x.to_string()))
                .and_then(|response| POP3List::parse_single(&response.status_text)),
            None => self
                .transact("LIST", None)
                .and_then(|response| POP3List::parse(&response.lines)),
        }
    }

    pub fn retr(&mut self, msgnum: u32) -> Result<POP3Retr> {
        trace!("Cmd: RETR");
        self.transact("RETR", Some(&msgnum.to_string()))
            .map(|response| POP3Retr::parse(msgnum, &response.lines))
    }

    /// Retrieve a message and decode it.
    pub fn fetch(&mut self, msgnum: u32) -> Result<EmailDocument> {
        let retr = self.retr(msgnum)?;
        Ok(EmailDocument::parse(msgnum, &retr.data))
    }

    /// Mark a message as deleted. The server only removes it once the
    /// session ends with QUIT.
    pub fn dele(&mut self, msgnum: u32) -> Result<()> {
        trace!("Cmd: DELE");
        self.transact("DELE", Some(&msgnum.to_string()))?;
        Ok(())
    }

    pub fn noop(&mut self) -> Result<()> {
        trace!("Cmd: NOOP");
        self.transact("NOOP", None)?;
        Ok(())
    }

    pub fn rset(&mut self) -> Result<()> {
        trace!("Cmd: RSET");
        self.transact("RSET", None)?;
        Ok(())
    }

    /// End the session. The transport is always released and the state is
    /// `Disconnected` afterwards; the result tells whether the server
    /// acknowledged the QUIT (and thereby committed any deletions).
    pub fn quit(&mut self) -> Result<()> {
        trace!("Cmd: QUIT");
        self.stop_keepalive();
        let mut session = lock_session(&self.session);
        session.quit(self.account.timeouts.quit())
    }

    fn transact(&mut self, command: &str, param: Option<&str>) -> Result<session::POP3Response> {
        let result = {
            let mut session = lock_session(&self.session);
            session
                .require(POP3State::Authenticated)
                .and_then(|_| session.send_command(command, param))
        };
        if let Err(ref e) = result {
            if e.is_transport() {
                warn!("{} failed, dropping the connection: {}", command, e);
                self.drop_connection();
            }
        }
        result
    }

    fn drop_connection(&mut self) {
        self.stop_keepalive();
        lock_session(&self.session).disconnect();
    }

    fn start_keepalive(&mut self) {
        self.stop_keepalive();
        let interval: Duration = self.account.timeouts.keepalive();
        self.keepalive = Some(KeepAlive::start(self.session.clone(), interval));
    }

    fn stop_keepalive(&mut self) {
        if let Some(mut keepalive) = self.keepalive.take() {
            keepalive.stop();
        }
    }
}

impl Drop for POP3Connection {
    /// Abandoning a connection never sends QUIT, so pending deletions are
    /// discarded by the server.
    fn drop(&mut self) {
        self.stop_keepalive();
        lock_session(&self.session).disconnect();
    }
}
