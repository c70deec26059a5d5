#![allow(dead_code)]
use std::time::Duration;
use script_mpi::{run_local, Communicator, Config, LocalCluster, LocalTransport, Result};

pub fn cluster(size: usize) -> LocalCluster {
    LocalCluster::new(size).wait_timeout(Duration::from_secs(10))
}

/// Run `f` on every rank of a default cluster and return the per-rank results.
pub fn run_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(Communicator<LocalTransport>) -> Result<R> + Sync,
{
    run_local(cluster(size), &Config::default(), f).unwrap()
}

pub fn run_with<R, F>(cluster: LocalCluster, config: Config, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(Communicator<LocalTransport>) -> Result<R> + Sync,
{
    run_local(cluster, &config, f).unwrap()
}
