//! Message passing of dynamically typed values.
//!
//! Values travel as a fixed-size first frame holding a small header and an
//! inline prefix, followed by an overflow transfer when the payload does not
//! fit. Non-blocking requests, batch completion and value-level collectives
//! are built on a [`MessageTransport`] that only moves bytes.
use std::thread;
use log::info;

pub mod codec;
pub mod collective;
pub mod communicator;
pub mod config;
pub mod error;
pub mod request;
pub mod transport;
pub mod value;

pub use codec::{SerializerKind, WireCodec};
pub use collective::{Methodology, Operator, ReduceFn, ReductionSpec, ValueKind};
pub use communicator::Communicator;
pub use config::Config;
pub use error::{Error, Result};
pub use request::{
    test_all, test_any, test_some, wait_all, wait_any, wait_some, AbandonedSends, Request,
    RequestManager, RequestState,
};
pub use transport::{MessageTransport, Rank, ReduceOp, Status, Tag, ANY_SOURCE, ANY_TAG};
pub use transport::local::{LocalCluster, LocalOptions, LocalTransport};
pub use value::{ElementType, NdArray, Value};

/// Initialize `env_logger`. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Run `f` once per rank of an in-process cluster, each on its own thread,
/// and return the results in rank order.
pub fn run_local<R, F>(cluster: LocalCluster, config: &Config, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Communicator<LocalTransport>) -> Result<R> + Sync,
{
    config.validate()?;
    let transports = cluster.build();
    info!("starting {} local ranks", transports.len());
    thread::scope(|s| {
        let workers: Vec<_> = transports
            .into_iter()
            .map(|transport| {
                let f = &f;
                s.spawn(move || f(Communicator::new(transport, config.clone())?))
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| {
                worker
                    .join()
                    .map_err(|_| Error::transport("rank thread panicked"))?
            })
            .collect()
    })
}
