//! A scripted POP3 server on the loopback interface.

#![allow(dead_code)]

use pop3_mime::{AccountConfig, Security};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const USER: &str = "alice";
pub const PASS: &str = "secret";

/// The server side of one client connection.
pub struct Peer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    pub received: Vec<String>,
}

impl Peer {
    /// Send one response line; `\n` inside `text` separates further lines.
    pub fn send(&mut self, text: &str) {
        for line in text.split('\n') {
            self.writer
                .write_all(format!("{}\r\n", line).as_bytes())
                .unwrap();
        }
        self.writer.flush().unwrap();
    }

    /// Like `send`, for writes the client may stop reading halfway through.
    pub fn send_ignoring_errors(&mut self, text: &str) {
        let _ = self
            .writer
            .write_all(format!("{}\r\n", text).as_bytes())
            .and_then(|_| self.writer.flush());
    }

    /// The next command from the client, or `None` once it hung up.
    pub fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let line = line.trim_end_matches(&['\r', '\n'][..]).to_owned();
                self.received.push(line.clone());
                Some(line)
            }
        }
    }

    pub fn expect(&mut self, command: &str) {
        assert_eq!(Some(command.to_owned()), self.recv());
    }

    pub fn greet(&mut self) {
        self.send("+OK POP3 server ready");
    }

    /// Greeting plus a successful USER/PASS exchange.
    pub fn accept_login(&mut self) {
        self.greet();
        self.expect(&format!("USER {}", USER));
        self.send("+OK");
        self.expect(&format!("PASS {}", PASS));
        self.send("+OK maildrop locked and ready");
    }

    /// Answer NOOPs until the client sends `command`.
    pub fn expect_skipping_noops(&mut self, command: &str) {
        loop {
            match self.recv() {
                Some(ref line) if line == "NOOP" => self.send("+OK"),
                other => {
                    assert_eq!(Some(command.to_owned()), other);
                    return;
                }
            }
        }
    }
}

pub struct MockServer {
    port: u16,
    handle: JoinHandle<Vec<String>>,
}

impl MockServer {
    /// Accept a single connection and run `script` against it. The
    /// connection is closed when the script returns.
    pub fn start<F>(script: F) -> MockServer
    where
        F: FnOnce(&mut Peer) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut peer = Peer {
                reader: BufReader::new(stream.try_clone().unwrap()),
                writer: stream,
                received: Vec::new(),
            };
            script(&mut peer);
            peer.received
        });
        MockServer {
            port: port,
            handle: handle,
        }
    }

    /// A plain-text account for this server with short timeouts and a
    /// keep-alive interval long enough to stay out of the way.
    pub fn account(&self) -> AccountConfig {
        let mut account = AccountConfig::new("127.0.0.1", self.port, Security::Plain)
            .with_credentials(USER, PASS);
        account.timeouts.read_ms = 2_000;
        account.timeouts.keepalive_ms = 60_000;
        account.timeouts.quit_ms = 500;
        account
    }

    /// Wait for the script to finish and return every command it saw.
    pub fn finish(self) -> Vec<String> {
        self.handle.join().expect("server script failed")
    }
}

/// A stateful maildrop serving a fixed number of sessions one after another.
///
/// DELE only marks a message; the mark becomes permanent when the session ends
/// with QUIT and is forgotten when the client hangs up without it.
pub struct Maildrop {
    port: u16,
    handle: JoinHandle<()>,
}

impl Maildrop {
    pub fn start(messages: Vec<&'static str>, sessions: usize) -> Maildrop {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let mut mailbox: Vec<Option<String>> = messages
                .into_iter()
                .map(|m| Some(m.replace('\n', "\r\n")))
                .collect();
            for _ in 0..sessions {
                let (stream, _) = listener.accept().unwrap();
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .unwrap();
                let mut peer = Peer {
                    reader: BufReader::new(stream.try_clone().unwrap()),
                    writer: stream,
                    received: Vec::new(),
                };
                serve_session(&mut peer, &mut mailbox);
            }
        });
        Maildrop {
            port: port,
            handle: handle,
        }
    }

    pub fn account(&self) -> AccountConfig {
        let mut account = AccountConfig::new("127.0.0.1", self.port, Security::Plain)
            .with_credentials(USER, PASS);
        account.timeouts.read_ms = 2_000;
        account.timeouts.keepalive_ms = 60_000;
        account.timeouts.quit_ms = 500;
        account
    }

    pub fn finish(self) {
        self.handle.join().expect("maildrop failed");
    }
}

fn serve_session(peer: &mut Peer, mailbox: &mut Vec<Option<String>>) {
    let mut marked: Vec<usize> = Vec::new();
    peer.greet();
    while let Some(line) = peer.recv() {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("");
        let arg = words.next().and_then(|n| n.parse::<usize>().ok());
        let visible = |n: usize, marked: &Vec<usize>| {
            n >= 1 && n <= mailbox.len() && mailbox[n - 1].is_some() && !marked.contains(&n)
        };
        match command {
            "USER" => peer.send("+OK"),
            "PASS" => peer.send("+OK"),
            "NOOP" => peer.send("+OK"),
            "STAT" => {
                let live: Vec<usize> = (1..=mailbox.len()).filter(|&n| visible(n, &marked)).collect();
                let size: usize = live
                    .iter()
                    .map(|&n| mailbox[n - 1].as_ref().map_or(0, String::len))
                    .sum();
                peer.send(&format!("+OK {} {}", live.len(), size));
            }
            "LIST" => {
                let mut response = String::from("+OK");
                for n in (1..=mailbox.len()).filter(|&n| visible(n, &marked)) {
                    let size = mailbox[n - 1].as_ref().map_or(0, String::len);
                    response.push_str(&format!("\n{} {}", n, size));
                }
                response.push_str("\n.");
                peer.send(&response);
            }
            "RETR" => match arg.filter(|&n| visible(n, &marked)) {
                Some(n) => {
                    let mut response = String::from("+OK");
                    for content in mailbox[n - 1].as_ref().map_or("", String::as_str).split("\r\n") {
                        response.push('\n');
                        if content.starts_with('.') {
                            response.push('.');
                        }
                        response.push_str(content);
                    }
                    response.push_str("\n.");
                    peer.send(&response);
                }
                None => peer.send("-ERR no such message"),
            },
            "DELE" => match arg.filter(|&n| visible(n, &marked)) {
                Some(n) => {
                    marked.push(n);
                    peer.send(&format!("+OK message {} deleted", n));
                }
                None => peer.send("-ERR no such message"),
            },
            "RSET" => {
                marked.clear();
                peer.send("+OK");
            }
            "QUIT" => {
                for &n in &marked {
                    mailbox[n - 1] = None;
                }
                peer.send("+OK bye");
                return;
            }
            _ => peer.send("-ERR unknown command"),
        }
    }
}
