//! Scenarios over the dynamic (text-framed TCP) transport. Every rank runs
//! in its own thread with its own reactor; whichever thread wins the bind
//! race becomes the master, so ranks derive their identity from the
//! bootstrapped group instead of the thread index.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use data::{ReduceOp, DOUBLE};
use execution::{Data, Executor};
use space::{Slice, Space};
use transition::{GroupRef, RecvOp, RedOp, SendOp, Transition};
use transport::{Dynamic, DynamicConfig};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn config(port: u16, size: usize) -> DynamicConfig {
    DynamicConfig {
        host: "127.0.0.1".into(),
        port,
        size,
        location: None,
    }
}

/// S1 over TCP, twice in a row: the second round proves that credits are
/// withdrawn and re-granted per slice.
#[test]
fn two_rank_swap_over_tcp() {
    init_logging();
    let port = free_port();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            std::thread::spawn(move || {
                let (mut transport, group) = Dynamic::bootstrap(&config(port, 2)).unwrap();
                let myid = group.myid();
                let peer = 1 - myid;

                let space = Space::new_1d("swap", 8);
                let slc = *space.shape();
                let mut container = Data::new("block", space, &DOUBLE);
                container.activate(&[slc]);
                container.fill_f64(myid as f64 + 1.0);

                let mut transition = Transition::new(1);
                transition.send.push(SendOp {
                    slc,
                    to_task: peer,
                    map_no: 0,
                });
                transition.recv.push(RecvOp {
                    slc,
                    from_task: peer,
                    map_no: 0,
                });

                let mut executor = Executor::new();
                container
                    .switch(&mut executor, &mut transport, &group, &transition, None, &[slc])
                    .unwrap();
                let first = container.map(0).as_slice::<f64>().to_vec();
                container
                    .switch(&mut executor, &mut transport, &group, &transition, None, &[slc])
                    .unwrap();
                let second = container.map(0).as_slice::<f64>().to_vec();
                (myid, first, second)
            })
        })
        .collect();

    let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort_by_key(|(myid, _, _)| *myid);
    for (myid, first, second) in results {
        let peer = 1 - myid;
        assert_eq!(first, vec![peer as f64 + 1.0; 8], "after first swap");
        assert_eq!(second, vec![myid as f64 + 1.0; 8], "after second swap");
    }
}

/// Property 5 territory: with input = output = all and a sum reduction,
/// the dynamic transport must use the manual reduction path and still give
/// every process the sum of all contributions.
#[test]
fn manual_all_reduce_over_tcp() {
    init_logging();
    let port = free_port();
    let n = 3;
    let handles: Vec<_> = (0..n)
        .map(|_| {
            std::thread::spawn(move || {
                let (mut transport, group) = Dynamic::bootstrap(&config(port, n)).unwrap();
                let space = Space::new_1d("sum", 4);
                let slc = *space.shape();
                let mut container = Data::new("contrib", space, &DOUBLE);
                container.activate(&[slc]);
                container.fill_f64(group.myid() as f64 + 1.0);

                let mut transition = Transition::new(1);
                transition.red.push(RedOp {
                    slc,
                    input: GroupRef::All,
                    output: GroupRef::All,
                    op: ReduceOp::Sum,
                    from_map_no: 0,
                    to_map_no: 0,
                });

                let mut executor = Executor::new();
                container
                    .switch(&mut executor, &mut transport, &group, &transition, None, &[slc])
                    .unwrap();
                container.map(0).as_slice::<f64>().to_vec()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![6.0; 4]);
    }
}

/// S5: a peer that registered but got no `allowsend` credit has its data
/// frames dropped with a warning, and the process keeps serving the
/// connection afterwards (status still answers, the frame did not corrupt
/// state).
#[test]
fn premature_data_is_dropped() {
    init_logging();
    let port = free_port();
    let stop = Arc::new(AtomicBool::new(false));
    let server_stop = Arc::clone(&stop);
    let server = std::thread::spawn(move || {
        let (mut transport, group) = Dynamic::bootstrap(&config(port, 1)).unwrap();
        assert_eq!(group.myid(), 0);
        while !server_stop.load(Ordering::Relaxed) {
            transport
                .poll_once(Some(Duration::from_millis(20)))
                .unwrap();
        }
    });

    let mut socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
    socket
        .write_all(b"register probe 127.0.0.1 1\n")
        .unwrap();
    // no credit was granted: this frame must be ignored
    socket
        .write_all(b"data 8 00 00 00 00 00 00 f0 3f\n")
        .unwrap();
    socket.write_all(b"status\n").unwrap();

    let reader = BufReader::new(socket.try_clone().unwrap());
    let mut saw_id = false;
    let mut saw_status = false;
    for line in reader.lines() {
        let line = line.unwrap();
        if line.starts_with("id 1 probe") {
            saw_id = true;
        }
        if line.contains("My locID is 0") {
            saw_status = true;
            break;
        }
    }
    assert!(saw_id, "registration was not answered");
    assert!(saw_status, "status not served after dropped data frame");

    socket.write_all(b"quit\n").unwrap();
    stop.store(true, Ordering::Relaxed);
    server.join().unwrap();
}

/// Interactive help: the usage text is served to unregistered connections.
#[test]
fn help_is_served_to_strangers() {
    init_logging();
    let port = free_port();
    let stop = Arc::new(AtomicBool::new(false));
    let server_stop = Arc::clone(&stop);
    let server = std::thread::spawn(move || {
        let (mut transport, _group) = Dynamic::bootstrap(&config(port, 1)).unwrap();
        while !server_stop.load(Ordering::Relaxed) {
            transport
                .poll_once(Some(Duration::from_millis(20)))
                .unwrap();
        }
    });

    let mut socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
    socket.write_all(b"help\n").unwrap();
    let reader = BufReader::new(socket.try_clone().unwrap());
    let mut saw_usage = false;
    for line in reader.lines() {
        let line = line.unwrap();
        if line.contains("first char of command is enough") {
            saw_usage = true;
        }
        if line.contains("status") {
            break;
        }
    }
    assert!(saw_usage);

    stop.store(true, Ordering::Relaxed);
    server.join().unwrap();
}

/// A 2-D sub-slice travelling element-wise with position annotations.
#[test]
fn two_dim_exchange_over_tcp() {
    init_logging();
    let port = free_port();
    let required = Slice::d2((0, 0), (4, 4));
    let sent = Slice::d2((1, 3), (3, 4));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            std::thread::spawn(move || {
                let (mut transport, group) = Dynamic::bootstrap(&config(port, 2)).unwrap();
                let myid = group.myid();
                let space = Space::new_2d("grid", 4, 4);
                let mut container = Data::new("tile", space, &DOUBLE);
                container.activate(&[required]);

                let mut transition = Transition::new(2);
                if myid == 0 {
                    let m = container.map(0);
                    let mut idx = required.from;
                    loop {
                        let v = (10 * idx.0[0] + idx.0[1]) as f64;
                        m.element_mut(&idx).copy_from_slice(&v.to_ne_bytes());
                        if !required.next_lex(&mut idx) {
                            break;
                        }
                    }
                    transition.send.push(SendOp {
                        slc: sent,
                        to_task: 1,
                        map_no: 0,
                    });
                } else {
                    transition.recv.push(RecvOp {
                        slc: sent,
                        from_task: 0,
                        map_no: 0,
                    });
                }

                let mut executor = Executor::new();
                container
                    .switch(
                        &mut executor,
                        &mut transport,
                        &group,
                        &transition,
                        None,
                        &[required],
                    )
                    .unwrap();
                (myid, container.map(0).as_slice::<f64>().to_vec())
            })
        })
        .collect();

    let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort_by_key(|(myid, _)| *myid);
    let received = &results[1].1;
    let mut idx = required.from;
    loop {
        let at = (idx.0[1] * 4 + idx.0[0]) as usize;
        let expect = if sent.contains(&idx) {
            (10 * idx.0[0] + idx.0[1]) as f64
        } else {
            0.0
        };
        assert_eq!(received[at], expect, "at {:?}", idx);
        if !required.next_lex(&mut idx) {
            break;
        }
    }
}
