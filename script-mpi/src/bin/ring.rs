use std::path::PathBuf;
use clap::Parser;
use log::info;
use script_mpi::{
    self,
    wait_all,
    Config,
    LocalCluster,
    SerializerKind,
    Value,
};

/// Pass each rank's number to its right neighbour with non-blocking
/// requests over an in-process cluster.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of ranks
    #[arg(short, long, default_value_t = 4)]
    ranks: usize,
    /// Extra bytes attached to every message
    #[arg(short, long, default_value_t = 0)]
    payload: usize,
    /// Generic object serializer
    #[arg(short, long, value_enum)]
    serializer: Option<SerializerKind>,
    /// YAML or JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

const RING_TAG: i32 = 7;

fn main() {
    script_mpi::init_logging();
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path).expect("Failed to load config"),
        None => Config::from_env().expect("Invalid environment config"),
    };
    if let Some(serializer) = args.serializer {
        config.serializer = serializer;
    }
    info!("ring of {} ranks with {:?}", args.ranks, config.serializer);

    let payload = args.payload;
    let results = script_mpi::run_local(LocalCluster::new(args.ranks), &config, |comm| {
        let rank = comm.rank();
        let size = comm.size() as i32;
        let token = Value::str(rank.to_string());
        let message = if payload > 0 {
            Value::Tuple(vec![token, Value::bytes(vec![0u8; payload])])
        } else {
            token
        };
        let mut requests = vec![
            comm.irecv((rank + size - 1) % size, RING_TAG)?,
            comm.isend(&message, (rank + 1) % size, RING_TAG)?,
        ];
        wait_all(&mut requests)?;
        let received = requests[0]
            .take_value()
            .unwrap_or(Value::None);
        comm.shutdown();
        Ok(match received {
            Value::Tuple(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        })
    })
    .expect("Ring exchange failed");

    for (rank, value) in results.iter().enumerate() {
        println!("{} {}", rank, value);
    }
}
