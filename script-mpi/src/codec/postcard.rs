use serde::{Serialize, de::DeserializeOwned};
use crate::{Error, Result};
use super::SerdeCodec;

pub struct PostcardCodec;

impl SerdeCodec for PostcardCodec {
    fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>> {
        ::postcard::to_allocvec(data)
            .map_err(|err| Error::SerializationFailed(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T> {
        ::postcard::from_bytes(buf)
            .map_err(|err| Error::DeserializationFailed(err.to_string()))
    }
}
