use serde::{Serialize, de::DeserializeOwned};
use crate::{Error, Result};
use super::SerdeCodec;

pub struct BincodeCodec;

impl SerdeCodec for BincodeCodec {
    fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>> {
        ::bincode::serialize(data)
            .map_err(|err| Error::SerializationFailed(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T> {
        ::bincode::deserialize(buf)
            .map_err(|err| Error::DeserializationFailed(err.to_string()))
    }
}
