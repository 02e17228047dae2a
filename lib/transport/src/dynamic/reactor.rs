use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{trace, warn};

use super::wire::MAX_LINE;

const LISTENER: Token = Token(0);

/// What the event loop observed during one poll round, in arrival order.
pub(crate) enum LoopEvent {
    /// A new inbound connection was accepted.
    Accepted { conn: usize },
    /// One complete command line arrived (newline stripped, CR normalised).
    Line { conn: usize, line: String },
    /// The peer closed the connection (or it failed); already deregistered.
    Closed { conn: usize, lid: i32 },
}

struct Conn {
    stream: TcpStream,
    lid: i32,
    rbuf: Vec<u8>,
    wbuf: Vec<u8>,
    closed: bool,
}

/// Readiness-driven socket multiplexer of the dynamic transport.
///
/// Owns the listening socket and every per-peer stream. All sockets are
/// non-blocking; callers suspend by polling in a loop until their
/// completion condition is satisfied by dispatched events.
pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    conns: Vec<Option<Conn>>,
}

impl Reactor {
    pub fn bind(addr: SocketAddr) -> io::Result<Reactor> {
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        Ok(Reactor {
            poll,
            events: Events::with_capacity(64),
            listener,
            conns: Vec::new(),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().expect("listener has no address").port()
    }

    fn token(conn: usize) -> Token {
        Token(conn + 1)
    }

    fn register_conn(&mut self, mut stream: TcpStream, lid: i32) -> io::Result<usize> {
        let idx = self
            .conns
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.conns.len());
        self.poll.registry().register(
            &mut stream,
            Self::token(idx),
            Interest::READABLE | Interest::WRITABLE,
        )?;
        let conn = Conn {
            stream,
            lid,
            rbuf: Vec::new(),
            wbuf: Vec::new(),
            closed: false,
        };
        if idx == self.conns.len() {
            self.conns.push(Some(conn));
        } else {
            self.conns[idx] = Some(conn);
        }
        Ok(idx)
    }

    /// Start a non-blocking connect; queued bytes flush once it completes.
    pub fn connect(&mut self, addr: SocketAddr) -> io::Result<usize> {
        let stream = TcpStream::connect(addr)?;
        self.register_conn(stream, -1)
    }

    pub fn conn_lid(&self, conn: usize) -> Option<i32> {
        self.conns.get(conn).and_then(Option::as_ref).map(|c| c.lid)
    }

    pub fn set_lid(&mut self, conn: usize, lid: i32) {
        if let Some(c) = self.conns[conn].as_mut() {
            c.lid = lid;
        }
    }

    pub fn write_pending(&self, conn: usize) -> bool {
        self.conns
            .get(conn)
            .and_then(Option::as_ref)
            .is_some_and(|c| !c.wbuf.is_empty())
    }

    /// Queue bytes for a connection and flush as much as the socket takes.
    pub fn queue(&mut self, conn: usize, bytes: &[u8]) {
        let Some(c) = self.conns.get_mut(conn).and_then(Option::as_mut) else {
            warn!(conn, "dropping write to closed connection");
            return;
        };
        c.wbuf.extend_from_slice(bytes);
        self.flush(conn);
    }

    fn flush(&mut self, idx: usize) {
        let Some(c) = self.conns.get_mut(idx).and_then(Option::as_mut) else {
            return;
        };
        while !c.wbuf.is_empty() {
            match c.stream.write(&c.wbuf) {
                Ok(0) => break,
                Ok(n) => {
                    c.wbuf.drain(..n);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::NotConnected =>
                {
                    // wait for writability, the poll loop retries
                    self.poll
                        .registry()
                        .reregister(
                            &mut c.stream,
                            Self::token(idx),
                            Interest::READABLE | Interest::WRITABLE,
                        )
                        .ok();
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(conn = idx, error = %e, "write error");
                    c.closed = true;
                    return;
                }
            }
        }
        self.poll
            .registry()
            .reregister(&mut c.stream, Self::token(idx), Interest::READABLE)
            .ok();
    }

    pub fn close(&mut self, conn: usize) {
        if let Some(mut c) = self.conns.get_mut(conn).and_then(Option::take) {
            self.poll.registry().deregister(&mut c.stream).ok();
        }
    }

    /// One poll round: accept connections, flush pending writes, read and
    /// frame inbound lines. Returns the observed events in order.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<Vec<LoopEvent>> {
        self.poll.poll(&mut self.events, timeout)?;
        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();

        let mut out = Vec::new();
        for (token, readable, writable) in ready {
            if token == LISTENER {
                loop {
                    match self.listener.accept() {
                        Ok((stream, addr)) => {
                            let conn = self.register_conn(stream, -1)?;
                            trace!(conn, %addr, "accepted connection");
                            out.push(LoopEvent::Accepted { conn });
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                continue;
            }

            let idx = token.0 - 1;
            if writable {
                self.flush(idx);
            }
            if readable {
                self.read_conn(idx, &mut out);
            }
            let closed = self
                .conns
                .get(idx)
                .and_then(Option::as_ref)
                .is_some_and(|c| c.closed);
            if closed {
                let lid = self.conn_lid(idx).unwrap_or(-1);
                self.close(idx);
                out.push(LoopEvent::Closed { conn: idx, lid });
            }
        }
        Ok(out)
    }

    fn read_conn(&mut self, idx: usize, out: &mut Vec<LoopEvent>) {
        let Some(c) = self.conns.get_mut(idx).and_then(Option::as_mut) else {
            return;
        };
        let mut tmp = [0u8; 4096];
        loop {
            match c.stream.read(&mut tmp) {
                Ok(0) => {
                    // peer closed: treat the leftover as a final command
                    if !c.rbuf.is_empty() {
                        c.rbuf.push(b'\n');
                    }
                    c.closed = true;
                    break;
                }
                Ok(n) => c.rbuf.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(conn = idx, error = %e, "read error");
                    c.closed = true;
                    break;
                }
            }
        }

        // extract complete lines; CR (sent by telnet) becomes whitespace
        let mut start = 0;
        for i in 0..c.rbuf.len() {
            if c.rbuf[i] == b'\r' {
                c.rbuf[i] = b' ';
            }
            if c.rbuf[i] == b'\n' {
                let line = String::from_utf8_lossy(&c.rbuf[start..i]).into_owned();
                out.push(LoopEvent::Line { conn: idx, line });
                start = i + 1;
            }
        }
        c.rbuf.drain(..start);
        assert!(
            c.rbuf.len() <= MAX_LINE,
            "receive buffer too small for one command"
        );
    }
}
