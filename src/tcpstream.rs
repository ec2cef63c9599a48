use openssl::ssl::{SslConnector, SslMethod, SslStream};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::Security;
use crate::errors::*;

#[derive(Debug)]
pub enum TCPStreamType {
    Plain(TcpStream),
    SSL(SslStream<TcpStream>),
}

impl Write for TCPStreamType {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            TCPStreamType::Plain(ref mut stream) => stream.write(buf),
            TCPStreamType::SSL(ref mut stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            TCPStreamType::Plain(ref mut stream) => stream.flush(),
            TCPStreamType::SSL(ref mut stream) => stream.flush(),
        }
    }
}

impl Read for TCPStreamType {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            TCPStreamType::Plain(ref mut stream) => stream.read(buf),
            TCPStreamType::SSL(ref mut stream) => stream.read(buf),
        }
    }
}

impl TCPStreamType {
    fn tcp(&self) -> &TcpStream {
        match *self {
            TCPStreamType::Plain(ref stream) => stream,
            TCPStreamType::SSL(ref stream) => stream.get_ref(),
        }
    }

    fn shutdown(&mut self) {
        if let TCPStreamType::SSL(ref mut stream) = *self {
            let _ = stream.shutdown();
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

/// Longest line accepted from the server, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Line oriented access to the server connection.
///
/// Reads block for at most the configured timeout and then fail with
/// `ErrorKind::Timeout`.
#[derive(Debug)]
pub struct TransportSession {
    stream: BufReader<TCPStreamType>,
    greeting: String,
    closed: bool,
}

impl TransportSession {
    /// Connect, optionally run the TLS handshake, and read the greeting. Only
    /// a positive greeting yields a session; otherwise the connection is
    /// closed again.
    pub fn open(
        host: &str,
        port: u16,
        security: Security,
        timeout: Duration,
    ) -> Result<TransportSession> {
        let tcp_stream = connect_tcp(host, port, timeout)?;
        tcp_stream.set_read_timeout(Some(timeout))?;
        tcp_stream.set_write_timeout(Some(timeout))?;
        let stream = match security {
            Security::Plain => {
                debug!("Creating a Plain TCP Connection");
                TCPStreamType::Plain(tcp_stream)
            }
            Security::Tls => {
                debug!("Creating a SSL Connection");
                let connector = SslConnector::builder(SslMethod::tls())?.build();
                TCPStreamType::SSL(connector.connect(host, tcp_stream)?)
            }
        };

        let mut transport = TransportSession {
            stream: BufReader::new(stream),
            greeting: String::new(),
            closed: false,
        };
        trace!("Reading Greeting from Server");
        let greeting = match transport.read_line() {
            Ok(line) => String::from_utf8_lossy(&line).into_owned(),
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };
        info!("S: {}", greeting);
        if !greeting.starts_with("+OK") {
            transport.close();
            return Err(ErrorKind::BadGreeting(greeting).into());
        }
        transport.greeting = greeting;
        Ok(transport)
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn send_line(&mut self, line: &str) -> Result<()> {
        if self.closed {
            return Err(ErrorKind::ConnectionClosed.into());
        }
        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{}\r\n", line).as_bytes())
            .and_then(|_| stream.flush())
            .map_err(map_io)
    }

    /// Read one line, without its CRLF or LF terminator. Lines longer than
    /// `MAX_LINE_LEN` fail with `LineTooLong`.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        const LF: u8 = 0x0a;
        if self.closed {
            return Err(ErrorKind::ConnectionClosed.into());
        }
        let mut buff = Vec::new();
        let n = (&mut self.stream)
            .take(MAX_LINE_LEN as u64)
            .read_until(LF, &mut buff)
            .map_err(map_io)?;
        if buff.last() != Some(&LF) {
            if n == MAX_LINE_LEN {
                return Err(ErrorKind::LineTooLong(MAX_LINE_LEN).into());
            }
            return Err(ErrorKind::ConnectionClosed.into());
        }
        buff.pop();
        if buff.last() == Some(&b'\r') {
            buff.pop();
        }
        Ok(buff)
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.stream.get_ref().tcp().set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Shut the connection down. Safe to call repeatedly; errors from the
    /// peer having already gone away are ignored.
    pub fn close(&mut self) {
        if !self.closed {
            trace!("Closing transport");
            self.closed = true;
            self.stream.get_mut().shutdown();
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => map_io(e),
        None => format!("no address found for {}", host).into(),
    })
}

fn map_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ErrorKind::Timeout.into(),
        io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionClosed.into(),
        _ => e.into(),
    }
}
