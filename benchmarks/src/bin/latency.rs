use clap::Parser;
use log::info;
use script_mpi::{Config, LocalCluster};
use benchmarks::Args;

const TAG: i32 = 1;

fn main() {
    script_mpi::init_logging();
    let args = Args::parse();
    let opts = benchmarks::load_config(&args.config)
        .expect("Failed to load benchmark config");
    let mut config = Config::from_env().expect("Invalid environment config");
    config.serializer = args.serializer;
    if let Some(eager_limit) = args.eager_limit {
        config.eager_limit = eager_limit;
    }
    info!("latency of {:?} values with {:?}", args.payload, config.serializer);

    let payload = args.payload;
    let results = script_mpi::run_local(LocalCluster::new(2), &config, |comm| {
        let rank = comm.rank();
        let peer = 1 - rank;
        benchmarks::latency(
            &opts,
            rank,
            |size| payload.prepare(size),
            |s_buf| {
                comm.send(s_buf, peer, TAG)?;
                comm.recv(peer, TAG).map(|_| ())
            },
            |s_buf| {
                comm.recv(peer, TAG)?;
                comm.send(s_buf, peer, TAG)
            },
        )
    })
    .expect("Benchmark failed");

    for (size, lat) in &results[0] {
        println!("{} {}", size, lat);
    }
}
