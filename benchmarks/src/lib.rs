use std::fs::File;
use std::path::{Path, PathBuf};
use clap::{
    Parser,
    ValueEnum,
};
use script_mpi::{Error, NdArray, Result, SerializerKind, Value};

mod latency;
pub use latency::{
    latency,
    LatencyOptions,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// YAML benchmark options
    pub config: PathBuf,
    /// Kind of value to send
    #[arg(value_enum)]
    pub payload: Payload,
    /// Generic object serializer
    #[arg(short, long, value_enum, default_value_t = SerializerKind::Bincode)]
    pub serializer: SerializerKind,
    /// Size of the first frame in bytes
    #[arg(short, long)]
    pub eager_limit: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Payload {
    /// Raw byte string
    Bytes,
    /// Contiguous f64 array
    Array,
    /// List of integers, through the generic serializer
    List,
}

impl Payload {
    /// Value with `size` elements.
    pub fn prepare(self, size: usize) -> Value {
        match self {
            Payload::Bytes => Value::bytes(vec![0xA5u8; size]),
            Payload::Array => Value::Array(NdArray::from_vec(
                (0..size).map(|i| i as f64).collect::<Vec<f64>>(),
            )),
            Payload::List => Value::List((0..size as i64).map(Value::Int).collect()),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<LatencyOptions> {
    let path = path.as_ref();
    let f = File::open(path)
        .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
    serde_yaml::from_reader(f).map_err(|err| Error::Config(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_sizes() {
        assert_eq!(Payload::Bytes.prepare(10).len(), Some(10));
        assert_eq!(Payload::Array.prepare(8).len(), Some(8));
        assert_eq!(Payload::List.prepare(3).len(), Some(3));
    }

    #[test]
    fn sample_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("latency.yaml");
        let opts = load_config(path).unwrap();
        assert_eq!(opts.skip, 16);
        assert!(opts.min_size <= opts.max_size);
    }
}
