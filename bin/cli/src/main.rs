//! Demo driver: run a small partitioned-container job on a chosen
//! transport and print a JSON summary per rank.
//!
//! The job gives every rank the full index space, fills it with
//! `rank + 1` and sum-reduces over all ranks, so every process must end up
//! with `N·(N+1)/2` in every element.

use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use data::{ReduceOp, DOUBLE};
use execution::{Data, Executor};
use space::{Group, Space};
use transition::{GroupRef, RedOp, Transition};
use transport::{Collective, Comm, Dynamic, DynamicConfig, Single, Transport};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransportKind {
    Single,
    Collective,
    Dynamic,
}

#[derive(Debug, Parser)]
#[clap(name = "laik", about = "Partitioned container runtime demo")]
struct Args {
    /// Transport to run the job on.
    #[clap(long, value_enum, default_value = "single")]
    transport: TransportKind,

    /// Number of in-process ranks (collective transport only).
    #[clap(long, default_value = "4")]
    ranks: usize,

    /// Elements per container.
    #[clap(long, default_value = "8")]
    elems: usize,
}

fn sum_job(transport: &mut dyn Transport, group: &Group, elems: usize) -> serde_json::Value {
    let space = Space::new_1d("sum", elems as i64);
    let slc = *space.shape();
    let mut container = Data::new("values", space, &DOUBLE);
    container.activate(&[slc]);
    container.fill_f64((group.myid() + 1) as f64);

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
        .switch(&mut executor, transport, group, &transition, None, &[slc])
        .expect("transition failed");

    let values = container.map(0).as_slice::<f64>().to_vec();
    let expect = (group.size() * (group.size() + 1) / 2) as f64;
    json!({
        "transport": transport.name(),
        "rank": group.myid(),
        "elements": elems,
        "value": values[0],
        "ok": values.iter().all(|v| *v == expect),
        "stat": container.stat(),
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    match args.transport {
        TransportKind::Single => {
            let group = Group::world(1, 0);
            let mut transport = Single::new();
            println!("{}", sum_job(&mut transport, &group, args.elems));
        }
        TransportKind::Collective => {
            let comms = Comm::world(args.ranks);
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let elems = args.elems;
                    std::thread::spawn(move || {
                        let group = Group::world(comm.size(), comm.rank() as i32);
                        let mut transport = Collective::new(comm, &group);
                        sum_job(&mut transport, &group, elems)
                    })
                })
                .collect();
            for handle in handles {
                println!("{}", handle.join().expect("rank panicked"));
            }
        }
        TransportKind::Dynamic => {
            let cfg = DynamicConfig::from_env();
            info!(?cfg, "bootstrapping dynamic transport");
            let (mut transport, group) = Dynamic::bootstrap(&cfg).expect("bootstrap failed");
            println!("{}", sum_job(&mut transport, &group, args.elems));
        }
    }
}
