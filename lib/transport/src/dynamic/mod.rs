//! Text-framed, credit-based transport over per-peer TCP streams.
//!
//! The on-wire protocol is newline-terminated ASCII, designed for easy
//! debugging via `nc`/`telnet`: commands are recognised by their first
//! letter, payload bytes travel as hex pairs, `#` lines are comments.
//!
//! Concurrency is cooperative and single-threaded: every public operation
//! that must wait (credit grants, inbound slices, the bootstrap handshake)
//! suspends by re-entering the reactor loop until a specific completion
//! condition is established by an inbound frame. Frames on one stream are
//! processed in arrival order, and the per-peer receive state admits only
//! one slice in flight per peer at a time.

mod reactor;
mod wire;

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use data::{ElemType, Mapping, ReduceOp};
use space::{Group, Index, LocationId, Slice, TaskId};
use tracing::{debug, info, trace, warn};

use self::reactor::{LoopEvent, Reactor};
use self::wire::Command;
use crate::{wait_for_debugger, Error, Result, Transport};

/// Default registration port, used when `LAIK_TCP2_PORT` is unset.
const DEFAULT_PORT: u16 = 7777;

/// Flush threshold for batched data frames.
const SEND_BATCH: usize = 32 * 1024;

/// Bootstrap settings of the dynamic transport.
#[derive(Clone, Debug)]
pub struct DynamicConfig {
    /// Host the master process binds; everyone else registers there.
    pub host: String,
    pub port: u16,
    /// World size the master waits for before releasing phase 0.
    pub size: usize,
    /// Unique location string; generated if not set.
    pub location: Option<String>,
}

impl DynamicConfig {
    /// Read `LAIK_TCP2_HOST`, `LAIK_TCP2_PORT` and `LAIK_SIZE`.
    pub fn from_env() -> Self {
        let host = std::env::var("LAIK_TCP2_HOST").unwrap_or_else(|_| "localhost".into());
        let port = std::env::var("LAIK_TCP2_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_PORT);
        let size = std::env::var("LAIK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|s| *s != 0)
            .unwrap_or(1);
        DynamicConfig {
            host,
            port,
            size,
            location: None,
        }
    }
}

/// Directory entry and exchange state of one peer.
#[derive(Default)]
struct Peer {
    known: bool,
    location: String,
    host: String,
    port: u16,
    conn: Option<usize>,
    disconnected: bool,

    // data we are currently receiving from this peer
    rcount: u64,
    roff: u64,
    relemsize: usize,
    rslc: Option<Slice>,
    ridx: Index,
    rstage: Vec<u8>,

    // credit: elements we are allowed to send to this peer
    scount: u64,
    selemsize: usize,
}

/// The dynamic transport instance of one process.
pub struct Dynamic {
    mylid: i32,
    location: String,
    advertise_host: String,
    listen_port: u16,
    phase: i32,
    maxid: i32,
    peer_count: usize,
    world_size: usize,
    peers: Vec<Peer>,
    reactor: Reactor,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(Error::Io)?
        .next()
        .ok_or_else(|| Error::Address(format!("{host}:{port}")))
}

impl Dynamic {
    /// Join (or found) the process group described by `cfg`.
    ///
    /// The master is whichever process manages to bind `host:port`; it
    /// waits until `size − 1` peers have registered, assigns location ids
    /// in registration order and releases everyone into phase 0. All other
    /// processes listen on an ephemeral port, register with the master and
    /// collect the directory.
    pub fn bootstrap(cfg: &DynamicConfig) -> Result<(Dynamic, Group)> {
        let location = cfg.location.clone().unwrap_or_else(unique_location);
        let master_addr = resolve(&cfg.host, cfg.port)?;

        // the master is whoever binds the home address; a taken port or a
        // non-local home host both mean somebody else is the master
        let (reactor, mylid) = match Reactor::bind(master_addr) {
            Ok(r) => (r, 0),
            Err(e)
                if e.kind() == std::io::ErrorKind::AddrInUse
                    || e.kind() == std::io::ErrorKind::AddrNotAvailable =>
            {
                let r = Reactor::bind(resolve("0.0.0.0", 0)?)?;
                (r, -1)
            }
            Err(e) => return Err(e.into()),
        };
        let listen_port = reactor.local_port();
        info!(%location, mylid, listen_port, "tcp2 listening");

        let mut d = Dynamic {
            mylid,
            location,
            advertise_host: "127.0.0.1".into(),
            listen_port,
            phase: -1,
            maxid: -1,
            peer_count: 0,
            world_size: 0,
            peers: Vec::new(),
            reactor,
        };

        // slot 0 is always the master
        d.ensure_peer(0);
        d.peers[0].known = true;
        d.peers[0].host = cfg.host.clone();
        d.peers[0].port = cfg.port;
        if d.mylid == 0 {
            d.peers[0].location = d.location.clone();
        }

        if d.mylid == 0 {
            d.maxid = 0;
            d.phase = 0;
            d.world_size = cfg.size.max(1);
            if d.world_size > 1 {
                info!(waiting_for = d.world_size - 1, "master: waiting for peers to join");
                let size = d.world_size;
                d.run_until(|d| d.peer_count + 1 >= size)?;
                for lid in 1..=d.maxid {
                    d.send_cmd(lid, "phase 0");
                }
            }
        } else {
            let register = format!(
                "register {} {} {}",
                d.location, d.advertise_host, d.listen_port
            );
            d.send_cmd(0, &register);
            d.run_until(|d| d.phase >= 0)?;
            assert!(d.mylid >= 0, "registration finished without an id");
            d.world_size = d.peer_count + 1;
        }

        wait_for_debugger(d.mylid);
        let group = Group::world(d.world_size, d.mylid);
        info!(
            rank = d.mylid,
            world = d.world_size,
            "tcp2 transport initialized"
        );
        Ok((d, group))
    }

    pub fn mylid(&self) -> TaskId {
        self.mylid
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Service inbound frames once; useful for idle processes that want to
    /// answer interactive commands.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        let events = self.reactor.poll_once(timeout)?;
        for ev in events {
            self.handle(ev);
        }
        Ok(())
    }

    fn run_until(&mut self, cond: impl Fn(&Dynamic) -> bool) -> Result<()> {
        while !cond(self) {
            self.poll_once(None)?;
        }
        Ok(())
    }

    fn handle(&mut self, ev: LoopEvent) {
        match ev {
            LoopEvent::Accepted { conn } => {
                self.reactor.queue(conn, b"# Here is laik tcp2\n");
            }
            LoopEvent::Line { conn, line } => self.got_cmd(conn, &line),
            LoopEvent::Closed { conn, lid } => {
                debug!(conn, lid, "connection closed");
                if lid >= 0 {
                    let p = &mut self.peers[lid as usize];
                    p.conn = None;
                    p.disconnected = true;
                }
            }
        }
    }

    fn ensure_peer(&mut self, lid: i32) {
        let lid = lid as usize;
        if lid >= self.peers.len() {
            self.peers.resize_with(lid + 1, Peer::default);
        }
    }

    /// Make sure we have an open connection to a peer; announce our own
    /// location id over fresh connections.
    fn ensure_conn(&mut self, lid: i32) -> usize {
        if let Some(conn) = self.peers[lid as usize].conn {
            return conn;
        }
        let p = &self.peers[lid as usize];
        if p.disconnected {
            panic!("LID {lid} is disconnected");
        }
        assert!(p.known, "no address known for LID {lid}");
        let addr = resolve(&p.host, p.port)
            .unwrap_or_else(|e| panic!("cannot resolve LID {lid} ({}:{}): {e}", p.host, p.port));
        let conn = self
            .reactor
            .connect(addr)
            .unwrap_or_else(|e| panic!("cannot connect to LID {lid} at {addr}: {e}"));
        self.reactor.set_lid(conn, lid);
        self.peers[lid as usize].conn = Some(conn);
        debug!(lid, %addr, "connected");
        if self.mylid >= 0 {
            let myid = format!("myid {}\n", self.mylid);
            self.reactor.queue(conn, myid.as_bytes());
        }
        conn
    }

    /// Send one command line to a peer, connecting if necessary.
    fn send_cmd(&mut self, lid: i32, cmd: &str) {
        let conn = self.ensure_conn(lid);
        trace!(lid, cmd, "sent cmd");
        let mut line = String::with_capacity(cmd.len() + 1);
        line.push_str(cmd);
        line.push('\n');
        self.reactor.queue(conn, line.as_bytes());
    }

    fn send_cmd_conn(&mut self, conn: usize, cmd: &str) {
        let mut line = String::with_capacity(cmd.len() + 1);
        line.push_str(cmd);
        line.push('\n');
        self.reactor.queue(conn, line.as_bytes());
    }

    fn got_cmd(&mut self, conn: usize, line: &str) {
        let Some(lid) = self.reactor.conn_lid(conn) else {
            return; // connection vanished mid-batch
        };
        trace!(conn, lid, line, "got cmd");

        match wire::parse(line) {
            Command::Register {
                location,
                host,
                port,
            } => self.got_register(conn, lid, location, host, port),
            Command::MyId { lid: peerid } => self.got_myid(conn, lid, peerid),
            Command::Help => self.got_help(conn),
            Command::Kill => {
                info!("exiting because of kill command");
                self.send_cmd_conn(conn, "# Exiting. Bye");
                std::process::exit(1);
            }
            Command::Quit => {
                debug!(conn, "closing connection because of quit command");
                self.reactor.close(conn);
                if lid >= 0 {
                    self.peers[lid as usize].conn = None;
                }
            }
            Command::Comment => trace!(line, "got comment"),
            Command::Status => self.got_status(conn),
            Command::Invalid(l) => warn!(line = %l, "cannot parse command, dropping frame"),
            Command::Unknown(l) => warn!(lid, line = %l, "unknown command"),

            // everything else requires a sender with an assigned id
            cmd => {
                if lid < 0 {
                    warn!(line, "ignoring command from unknown sender");
                    self.send_cmd_conn(conn, "# first register, see 'help'");
                    return;
                }
                match cmd {
                    Command::Id {
                        lid: id,
                        location,
                        host,
                        port,
                    } => self.got_id(id, location, host, port),
                    Command::Phase { phase } => {
                        if self.mylid == 0 {
                            warn!(line, "ignoring phase command as master");
                            return;
                        }
                        debug!(phase, "got phase");
                        self.phase = phase;
                    }
                    Command::AllowSend { count, elemsize } => {
                        debug!(lid, count, elemsize, "got allowsend");
                        let p = &mut self.peers[lid as usize];
                        assert_eq!(p.scount, 0, "credit from LID {lid} still active");
                        p.scount = count;
                        p.selemsize = elemsize;
                    }
                    Command::Data { len, pos, bytes } => self.got_data(lid, len, pos, bytes),
                    _ => unreachable!(),
                }
            }
        }
    }

    fn got_register(&mut self, conn: usize, lid: i32, location: String, host: String, port: u16) {
        if self.mylid != 0 {
            warn!(%location, "ignoring register command, not master");
            return;
        }
        if lid >= 0 {
            warn!(lid, "cannot re-register, already registered");
            return;
        }

        self.maxid += 1;
        let newlid = self.maxid;
        self.reactor.set_lid(conn, newlid);
        self.ensure_peer(newlid);
        info!(lid = newlid, %location, %host, port, "registered new location");
        {
            let p = &mut self.peers[newlid as usize];
            assert!(!p.known);
            p.known = true;
            p.conn = Some(conn);
            p.location = location;
            p.host = host;
            p.port = port;
        }

        // announce the newcomer to everybody registered, and the whole
        // directory (including the master itself) to the newcomer
        let p = &self.peers[newlid as usize];
        let announce = format!("id {} {} {} {}", newlid, p.location, p.host, p.port);
        for lid in 1..=self.maxid {
            self.send_cmd(lid, &announce);
        }
        for lid in 0..self.maxid {
            let p = &self.peers[lid as usize];
            let entry = format!(
                "id {} {} {} {}",
                lid,
                p.location,
                if lid == 0 { &self.advertise_host } else { &p.host },
                p.port
            );
            self.send_cmd(newlid, &entry);
        }
        self.peer_count += 1;
    }

    fn got_myid(&mut self, conn: usize, lid: i32, peerid: i32) {
        if lid >= 0 {
            assert_eq!(lid, peerid, "peer already known under a different id");
            return;
        }
        assert_ne!(peerid, self.mylid, "peer claims my own location id");
        assert!(peerid >= 0, "invalid location id {peerid}");
        // the connect may overtake the master's directory announcement;
        // accept the id and let the announcement fill in the address
        self.ensure_peer(peerid);
        if peerid > self.maxid {
            self.maxid = peerid;
        }
        self.reactor.set_lid(conn, peerid);
        self.peers[peerid as usize].conn = Some(conn);
        debug!(lid = peerid, conn, "identified peer connection");
    }

    fn got_id(&mut self, lid: i32, location: String, host: String, port: u16) {
        if self.mylid == 0 {
            warn!(lid, "ignoring id command as master");
            return;
        }
        assert!(lid >= 0);
        self.ensure_peer(lid);
        if self.mylid < 0 && location == self.location {
            self.mylid = lid;
        }
        let myid = self.mylid;
        let p = &mut self.peers[lid as usize];
        if p.known {
            assert_eq!(p.location, location, "conflicting directory entry");
            assert_eq!(p.port, port);
        } else {
            p.known = true;
            p.location = location;
            p.host = host;
            p.port = port;
            if lid != myid {
                self.peer_count += 1;
            }
            if lid > self.maxid {
                self.maxid = lid;
            }
        }
        debug!(
            lid,
            mine = lid == self.mylid,
            peers = self.peer_count,
            "seen location id"
        );
    }

    fn got_help(&mut self, conn: usize) {
        for usage in [
            "# Usage (first char of command is enough):",
            "#  data <len> [pos] <hex> ...   : payload for an outstanding receive",
            "#  help                         : this help text",
            "#  id <id> <loc> <host> <port>  : announce location id info",
            "#  kill                         : ask process to terminate",
            "#  myid <id>                    : identify your location id",
            "#  phase <phase>                : announce current phase",
            "#  quit                         : close connection",
            "#  register <loc> <host> <port> : request assignment of id",
            "#  status                       : request status output",
        ] {
            self.send_cmd_conn(conn, usage);
        }
    }

    fn got_status(&mut self, conn: usize) {
        let status = format!("# My locID is {}", self.mylid);
        self.send_cmd_conn(conn, &status);
        self.send_cmd_conn(conn, "# Processes in world:");
        for lid in 0..=self.maxid.max(0) {
            let p = &self.peers[lid as usize];
            let line = format!("#  LID {:2} loc '{}' at {}:{}", lid, p.location, p.host, p.port);
            self.send_cmd_conn(conn, &line);
        }
    }

    fn got_data(&mut self, lid: i32, len: usize, pos: Option<String>, bytes: Vec<u8>) {
        let p = &mut self.peers[lid as usize];
        if p.rcount == 0 || p.roff == p.rcount {
            warn!(lid, "ignoring data from peer without send permission");
            return;
        }
        assert_eq!(len, p.relemsize, "data frame size does not match receive");
        let slc = p.rslc.expect("receive without slice");

        if let Some(pos) = pos {
            let expect = format!("({}:{})", p.roff, p.ridx.display(slc.dims()));
            assert_eq!(pos, expect, "position annotation disagrees with cursor");
        }

        p.rstage.extend_from_slice(&bytes);
        p.roff += 1;
        let in_traversal = slc.next_lex(&mut p.ridx);
        assert_eq!(in_traversal, p.roff < p.rcount);
        trace!(lid, len, got = p.roff, total = p.rcount, "got data");
    }

    /// Post the outstanding-receive state and grant the sender its credit.
    fn begin_recv(&mut self, lid: i32, count: u64, elemsize: usize, slc: Slice) {
        {
            let p = &mut self.peers[lid as usize];
            assert_eq!(p.rcount, 0, "receive from LID {lid} already in flight");
            assert!(count > 0);
            p.rcount = count;
            p.roff = 0;
            p.relemsize = elemsize;
            p.ridx = slc.from;
            p.rslc = Some(slc);
            p.rstage.clear();
            p.rstage.reserve(count as usize * elemsize);
        }
        let grant = format!("allowsend {count} {elemsize}");
        self.send_cmd(lid, &grant);
    }

    /// Wait until the peer granted us credit for exactly this transfer.
    fn wait_credit(&mut self, lid: i32, count: u64, elemsize: usize) -> Result<()> {
        self.run_until(|d| d.peers[lid as usize].scount > 0)?;
        let p = &self.peers[lid as usize];
        assert_eq!(p.scount, count, "credit does not match transfer size");
        assert_eq!(p.selemsize, elemsize);
        Ok(())
    }

    /// Block until everything queued for the peer reached the socket.
    fn drain(&mut self, lid: i32) -> Result<()> {
        let Some(conn) = self.peers[lid as usize].conn else {
            return Ok(());
        };
        self.run_until(|d| !d.reactor.write_pending(conn))
    }

    fn take_stage(&mut self, lid: i32) -> Vec<u8> {
        let p = &mut self.peers[lid as usize];
        p.rcount = 0;
        std::mem::take(&mut p.rstage)
    }
}

fn unique_location() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
    format!("{host}:{}.{seq}", std::process::id())
}

impl Transport for Dynamic {
    fn name(&self) -> &'static str {
        "tcp2"
    }

    fn send(&mut self, buf: &[u8], elem: &dyn ElemType, to: LocationId) -> Result<()> {
        let es = elem.size();
        assert_eq!(buf.len() % es, 0);
        let count = (buf.len() / es) as u64;
        let lid = to.0 as i32;

        self.wait_credit(lid, count, es)?;
        let mut batch = String::new();
        for chunk in buf.chunks_exact(es) {
            wire::push_data_line(&mut batch, chunk, None);
            if batch.len() >= SEND_BATCH {
                let conn = self.ensure_conn(lid);
                self.reactor.queue(conn, batch.as_bytes());
                batch.clear();
            }
        }
        if !batch.is_empty() {
            let conn = self.ensure_conn(lid);
            self.reactor.queue(conn, batch.as_bytes());
        }
        // withdraw our right to send further data
        self.peers[lid as usize].scount = 0;
        self.drain(lid)
    }

    fn recv(&mut self, buf: &mut [u8], elem: &dyn ElemType, from: LocationId) -> Result<usize> {
        let es = elem.size();
        assert_eq!(buf.len() % es, 0);
        let count = (buf.len() / es) as u64;
        let lid = from.0 as i32;

        self.begin_recv(lid, count, es, Slice::d1(0, count as i64));
        self.run_until(|d| {
            let p = &d.peers[lid as usize];
            p.roff == p.rcount
        })?;
        let stage = self.take_stage(lid);
        buf.copy_from_slice(&stage);
        Ok(count as usize)
    }

    fn send_slice(
        &mut self,
        map: &Mapping,
        slc: &Slice,
        elem: &dyn ElemType,
        to: LocationId,
        _scratch: &mut Vec<u8>,
    ) -> Result<u64> {
        let es = elem.size();
        let size = slc.size();
        let dims = slc.dims();
        let lid = to.0 as i32;
        assert!(map.is_allocated(), "sending slice {slc} from unwritten mapping");

        // the action ordering guarantees a matching receive exists; wait
        // for it to grant us the right to send
        self.wait_credit(lid, size, es)?;

        let mut idx = slc.from;
        let mut n = 0u64;
        let mut batch = String::new();
        loop {
            let pos = format!("({}:{})", n, idx.display(dims));
            wire::push_data_line(&mut batch, map.element(&idx), Some(&pos));
            n += 1;
            if batch.len() >= SEND_BATCH {
                let conn = self.ensure_conn(lid);
                self.reactor.queue(conn, batch.as_bytes());
                batch.clear();
            }
            if !slc.next_lex(&mut idx) {
                break;
            }
        }
        if !batch.is_empty() {
            let conn = self.ensure_conn(lid);
            self.reactor.queue(conn, batch.as_bytes());
        }
        assert_eq!(n, size);
        self.peers[lid as usize].scount = 0;
        self.drain(lid)?;
        Ok(n)
    }

    fn recv_slice(
        &mut self,
        map: &mut Mapping,
        slc: &Slice,
        elem: &dyn ElemType,
        from: LocationId,
        ro: ReduceOp,
        _scratch: &mut Vec<u8>,
    ) -> Result<u64> {
        let es = elem.size();
        let count = slc.size();
        let lid = from.0 as i32;
        map.ensure_allocated();

        self.begin_recv(lid, count, es, *slc);
        self.run_until(|d| {
            let p = &d.peers[lid as usize];
            p.roff == p.rcount
        })?;

        let stage = self.take_stage(lid);
        let mut cursor = slc.from;
        if ro == ReduceOp::None {
            let unpacked = map.unpack(slc, &mut cursor, &stage);
            assert_eq!(unpacked as u64, count);
        } else {
            for chunk in stage.chunks_exact(es) {
                elem.reduce(map.element_mut(&cursor), chunk, ro);
                if !slc.next_lex(&mut cursor) {
                    cursor = slc.to;
                }
            }
            assert!(cursor.equals(slc.dims(), &slc.to));
        }
        Ok(count)
    }

    fn update_group(&mut self, group: &Group) -> Result<()> {
        // location ids are stable across group changes; nothing to rebuild
        debug!(gid = group.gid(), size = group.size(), "group updated");
        Ok(())
    }
}
