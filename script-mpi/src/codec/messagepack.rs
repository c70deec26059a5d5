use serde::{Serialize, de::DeserializeOwned};
use crate::{Error, Result};
use super::SerdeCodec;

pub struct MessagePackCodec;

impl SerdeCodec for MessagePackCodec {
    fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec(data)
            .map_err(|err| Error::SerializationFailed(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T> {
        rmp_serde::from_slice(buf)
            .map_err(|err| Error::DeserializationFailed(err.to_string()))
    }
}
