use std::env;
use std::fs::File;
use std::path::Path;
use serde::{Serialize, Deserialize};
use crate::{Error, Result};
use crate::codec::{SerializerKind, WireCodec, DEFAULT_EAGER_LIMIT, HEADER_SIZE};
use crate::transport::Tag;

/// Runtime configuration. Every rank must use the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Total size of the first frame in bytes
    pub eager_limit: usize,
    /// Generic object serializer
    pub serializer: SerializerKind,
    /// Tag for gathering values to the root of a reduction
    pub collective_tag: Tag,
    /// Tag for the tree reduction
    pub tree_tag: Tag,
    pub scatter_tag: Tag,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            eager_limit: DEFAULT_EAGER_LIMIT,
            serializer: SerializerKind::default(),
            collective_tag: 987,
            tree_tag: 77,
            scatter_tag: 0,
        }
    }
}

impl Config {
    /// Load a YAML (or `.json`) file. Missing keys take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let f = File::open(path)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
        let config: Config = if path.extension().map_or(false, |ext| ext == "json") {
            serde_json::from_reader(f).map_err(|err| Error::Config(err.to_string()))?
        } else {
            serde_yaml::from_reader(f).map_err(|err| Error::Config(err.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `SCRIPT_MPI_EAGER_LIMIT` and
    /// `SCRIPT_MPI_SERIALIZER`.
    pub fn from_env() -> Result<Config> {
        Config::default().with_env()
    }

    pub fn with_env(mut self) -> Result<Config> {
        if let Ok(limit) = env::var("SCRIPT_MPI_EAGER_LIMIT") {
            self.eager_limit = limit.parse().map_err(|_| {
                Error::Config(format!("SCRIPT_MPI_EAGER_LIMIT={} is not a number", limit))
            })?;
        }
        if let Ok(name) = env::var("SCRIPT_MPI_SERIALIZER") {
            self.serializer = SerializerKind::from_name(&name).ok_or_else(|| {
                Error::Config(format!("unknown serializer {:?}", name))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.eager_limit <= HEADER_SIZE {
            return Err(Error::Config(format!(
                "eager limit {} leaves no room after the {} byte header",
                self.eager_limit, HEADER_SIZE,
            )));
        }
        if self.eager_limit - HEADER_SIZE > i16::MAX as usize {
            return Err(Error::Config(format!(
                "eager limit {} exceeds the largest prefix",
                self.eager_limit,
            )));
        }
        Ok(())
    }

    pub fn codec(&self) -> WireCodec {
        WireCodec::new(self.eager_limit, self.serializer)
    }
}
