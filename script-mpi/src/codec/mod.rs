//! Two-part wire format.
//!
//! A value travels as a fixed-size first frame (header plus inline prefix)
//! optionally followed by an overflow payload whose length the header
//! announces. Integers and floats ride in the header itself, short payloads
//! fit the prefix, and everything else spills into the overflow.
use serde::{Serialize, Deserialize, de::DeserializeOwned};
use log::trace;
use crate::{Error, Result, Value};
#[cfg(feature = "array-fast-path")]
use crate::value::{ElementType, NdArray};

mod bincode;
mod header;
mod messagepack;
mod postcard;
pub use header::{MessageKind, WireHeader, WireMessage, HEADER_SIZE};
pub use self::bincode::BincodeCodec;
pub use self::messagepack::MessagePackCodec;
pub use self::postcard::PostcardCodec;

/// Default total size of the first frame.
pub const DEFAULT_EAGER_LIMIT: usize = 512;

/// A serde format usable as the generic object encoder.
pub trait SerdeCodec {
    fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Bincode,
    #[value(name = "messagepack")]
    MessagePack,
    Postcard,
}

impl SerializerKind {
    pub fn from_name(name: &str) -> Option<SerializerKind> {
        match name.to_ascii_lowercase().as_str() {
            "bincode" => Some(SerializerKind::Bincode),
            "messagepack" | "msgpack" => Some(SerializerKind::MessagePack),
            "postcard" => Some(SerializerKind::Postcard),
            _ => None,
        }
    }

    pub fn encode<T: Serialize>(self, data: &T) -> Result<Vec<u8>> {
        match self {
            SerializerKind::Bincode => BincodeCodec::encode(data),
            SerializerKind::MessagePack => MessagePackCodec::encode(data),
            SerializerKind::Postcard => PostcardCodec::encode(data),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, buf: &[u8]) -> Result<T> {
        match self {
            SerializerKind::Bincode => BincodeCodec::decode(buf),
            SerializerKind::MessagePack => MessagePackCodec::decode(buf),
            SerializerKind::Postcard => PostcardCodec::decode(buf),
        }
    }
}

/// Overflow payload, either borrowed from the value being sent or owned.
#[derive(Debug, Clone, PartialEq)]
pub enum Overflow<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl<'a> Overflow<'a> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Overflow::Borrowed(view) => view,
            Overflow::Owned(buf) => buf,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Overflow::Borrowed(view) => view.to_vec(),
            Overflow::Owned(buf) => buf,
        }
    }
}

/// Output of [`WireCodec::pack`].
#[derive(Debug)]
pub struct Packed<'a> {
    pub message: WireMessage,
    pub overflow: Option<Overflow<'a>>,
}

/// Packs values into the two-part format and back.
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    eager_limit: usize,
    serializer: SerializerKind,
}

impl Default for WireCodec {
    fn default() -> WireCodec {
        WireCodec::new(DEFAULT_EAGER_LIMIT, SerializerKind::default())
    }
}

impl WireCodec {
    /// `eager_limit` is checked by [`Config::validate`](crate::Config::validate). A codec
    /// built with a larger limit fails to pack prefixes the header cannot describe.
    pub fn new(eager_limit: usize, serializer: SerializerKind) -> WireCodec {
        WireCodec {
            eager_limit,
            serializer,
        }
    }

    /// Total size of a first frame.
    pub fn frame_len(&self) -> usize {
        self.eager_limit
    }

    /// Inline prefix capacity.
    pub fn prefix_capacity(&self) -> usize {
        self.eager_limit.saturating_sub(HEADER_SIZE)
    }

    pub fn serializer(&self) -> SerializerKind {
        self.serializer
    }

    pub fn pack<'a>(&self, value: &'a Value) -> Result<Packed<'a>> {
        let packed = match value {
            Value::Int(i) => {
                let mut header = WireHeader::new(MessageKind::Long);
                header.long_payload = *i;
                self.inline(header)
            }
            Value::Float(x) => {
                let mut header = WireHeader::new(MessageKind::Double);
                header.double_payload = *x;
                self.inline(header)
            }
            Value::Bytes(bytes) => self.variable(MessageKind::String, Overflow::Borrowed(bytes))?,
            #[cfg(feature = "array-fast-path")]
            Value::Array(array) if !array.is_empty() => match self.pack_array(array)? {
                Some(packed) => packed,
                None => self.pack_generic(value)?,
            },
            _ => self.pack_generic(value)?,
        };
        trace!(
            "packed {} as {:?} (prefix {}, overflow {})",
            value.type_name(),
            packed.message.header.kind,
            packed.message.header.bytes_in_prefix,
            packed.message.header.bytes_in_second_message,
        );
        Ok(packed)
    }

    fn inline<'a>(&self, header: WireHeader) -> Packed<'a> {
        Packed {
            message: WireMessage::new(header),
            overflow: None,
        }
    }

    /// Put `payload` in the prefix if it fits, otherwise in the overflow.
    fn variable<'a>(&self, kind: MessageKind, payload: Overflow<'a>) -> Result<Packed<'a>> {
        let header = WireHeader::new(kind);
        if payload.len() <= self.prefix_capacity() {
            return Ok(Packed {
                message: WireMessage::new(header).with_prefix(payload.as_slice())?,
                overflow: None,
            });
        }
        let mut message = WireMessage::new(header);
        message.header.bytes_in_second_message = overflow_length(payload.len())?;
        message.header.free_overflow_buffer = matches!(payload, Overflow::Owned(_));
        Ok(Packed {
            message,
            overflow: Some(payload),
        })
    }

    fn pack_generic<'a>(&self, value: &Value) -> Result<Packed<'a>> {
        let bytes = self.serializer.encode(value)?;
        self.variable(MessageKind::Generic, Overflow::Owned(bytes))
    }

    /// Shape in the prefix, raw storage as the overflow. Falls back to the
    /// generic path if the encoded shape does not fit inline.
    #[cfg(feature = "array-fast-path")]
    fn pack_array<'a>(&self, array: &'a NdArray) -> Result<Option<Packed<'a>>> {
        let shape: Vec<u64> = array.shape().iter().map(|d| *d as u64).collect();
        let shape = self.serializer.encode(&shape)?;
        if shape.len() > self.prefix_capacity() {
            return Ok(None);
        }
        let mut message = WireMessage::new(WireHeader::new(MessageKind::Array)).with_prefix(&shape)?;
        message.header.long_payload = array.dtype().tag();
        message.header.bytes_in_second_message = overflow_length(array.as_bytes().len())?;
        Ok(Some(Packed {
            message,
            overflow: Some(Overflow::Borrowed(array.as_bytes())),
        }))
    }

    /// Decode a message. The overflow is consumed and released here.
    pub fn unpack(&self, message: &WireMessage, overflow: Option<Overflow<'_>>) -> Result<Value> {
        let header = &message.header;
        match header.kind {
            MessageKind::Long => Ok(Value::Int(header.long_payload)),
            MessageKind::Double => Ok(Value::Float(header.double_payload)),
            MessageKind::String => {
                if header.bytes_in_prefix > 0 {
                    Ok(Value::Bytes(message.prefix.clone()))
                } else if header.bytes_in_second_message > 0 {
                    Ok(Value::Bytes(take_overflow(header, overflow)?.into_vec()))
                } else {
                    Ok(Value::Bytes(vec![]))
                }
            }
            MessageKind::Array => self.unpack_array(message, overflow),
            MessageKind::Generic => {
                if header.bytes_in_prefix > 0 {
                    self.serializer.decode(&message.prefix)
                } else {
                    let payload = take_overflow(header, overflow)?;
                    self.serializer.decode(payload.as_slice())
                }
            }
        }
    }

    #[cfg(feature = "array-fast-path")]
    fn unpack_array(&self, message: &WireMessage, overflow: Option<Overflow<'_>>) -> Result<Value> {
        let header = &message.header;
        let shape: Vec<u64> = self.serializer.decode(&message.prefix)?;
        let dtype = ElementType::from_tag(header.long_payload).ok_or_else(|| {
            Error::DeserializationFailed(format!("unknown element tag {}", header.long_payload))
        })?;
        let data = take_overflow(header, overflow)?.into_vec();
        let shape = shape.into_iter().map(|d| d as usize).collect();
        NdArray::from_raw(dtype, shape, data)
            .map(Value::Array)
            .map_err(|err| Error::DeserializationFailed(err.to_string()))
    }

    #[cfg(not(feature = "array-fast-path"))]
    fn unpack_array(&self, _message: &WireMessage, _overflow: Option<Overflow<'_>>) -> Result<Value> {
        Err(Error::UnsupportedEncoding(MessageKind::Array as i32))
    }
}

fn overflow_length(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        Error::SerializationFailed(format!("payload of {} bytes is too large", len))
    })
}

fn take_overflow<'a>(header: &WireHeader, overflow: Option<Overflow<'a>>) -> Result<Overflow<'a>> {
    let overflow = overflow.ok_or_else(|| {
        Error::DeserializationFailed("header announces an overflow that was not supplied".into())
    })?;
    if overflow.len() != header.overflow_len() {
        return Err(Error::DeserializationFailed(format!(
            "overflow holds {} bytes, header announces {}",
            overflow.len(),
            header.bytes_in_second_message,
        )));
    }
    Ok(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NdArray;

    fn roundtrip(codec: &WireCodec, value: &Value) -> Value {
        let packed = codec.pack(value).unwrap();
        let overflow = packed.overflow.map(|o| Overflow::Owned(o.into_vec()));
        codec.unpack(&packed.message, overflow).unwrap()
    }

    #[test]
    fn test_scalars_travel_in_header() {
        let codec = WireCodec::default();
        let packed = codec.pack(&Value::Int(-42)).unwrap();
        assert_eq!(packed.message.header.kind, MessageKind::Long);
        assert_eq!(packed.message.header.long_payload, -42);
        assert!(packed.overflow.is_none());
        assert!(packed.message.prefix.is_empty());

        let packed = codec.pack(&Value::Float(2.5)).unwrap();
        assert_eq!(packed.message.header.kind, MessageKind::Double);
        assert_eq!(packed.message.header.double_payload, 2.5);
    }

    #[test]
    fn test_string_boundary() {
        let codec = WireCodec::default();
        let cap = codec.prefix_capacity();
        assert_eq!(cap, 480);

        let exact = Value::Bytes(vec![b'a'; cap]);
        let packed = codec.pack(&exact).unwrap();
        assert_eq!(packed.message.header.bytes_in_prefix as usize, cap);
        assert_eq!(packed.message.header.bytes_in_second_message, 0);
        assert!(packed.overflow.is_none());

        let over = Value::Bytes(vec![b'a'; cap + 1]);
        let packed = codec.pack(&over).unwrap();
        assert_eq!(packed.message.header.bytes_in_prefix, 0);
        assert_eq!(packed.message.header.bytes_in_second_message as usize, cap + 1);
        assert!(!packed.message.header.free_overflow_buffer);
        assert!(matches!(packed.overflow, Some(Overflow::Borrowed(b)) if b.len() == cap + 1));

        assert_eq!(roundtrip(&codec, &exact), exact);
        assert_eq!(roundtrip(&codec, &over), over);
    }

    #[test]
    fn test_generic_overflow_is_owned() {
        let codec = WireCodec::default();
        let big = Value::List((0..200).map(|i| Value::str(format!("item {}", i))).collect());
        let packed = codec.pack(&big).unwrap();
        assert_eq!(packed.message.header.kind, MessageKind::Generic);
        assert_eq!(packed.message.header.bytes_in_prefix, 0);
        assert!(packed.message.header.free_overflow_buffer);
        assert!(matches!(packed.overflow, Some(Overflow::Owned(_))));
        assert_eq!(roundtrip(&codec, &big), big);
    }

    #[test]
    fn test_roundtrip_all_serializers() {
        let value = Value::Map(vec![
            (Value::str("none"), Value::None),
            (Value::str("flag"), Value::Bool(true)),
            (Value::Int(3), Value::Tuple(vec![Value::Float(0.25), Value::str("x")])),
        ]);
        for kind in [SerializerKind::Bincode, SerializerKind::MessagePack, SerializerKind::Postcard] {
            let codec = WireCodec::new(DEFAULT_EAGER_LIMIT, kind);
            let packed = codec.pack(&value).unwrap();
            assert!(packed.message.header.bytes_in_prefix > 0);
            assert_eq!(roundtrip(&codec, &value), value);
        }
    }

    #[cfg(feature = "array-fast-path")]
    #[test]
    fn test_array_fast_path() {
        let codec = WireCodec::default();
        let array = NdArray::new(vec![2, 3], &[1i32, 2, 3, 4, 5, 6]).unwrap();
        let value = Value::Array(array.clone());
        let packed = codec.pack(&value).unwrap();
        assert_eq!(packed.message.header.kind, MessageKind::Array);
        assert_eq!(packed.message.header.long_payload, array.dtype().tag());
        assert_eq!(packed.message.header.bytes_in_second_message, 24);
        assert!(matches!(packed.overflow, Some(Overflow::Borrowed(_))));
        assert_eq!(roundtrip(&codec, &value), value);
    }

    #[test]
    fn test_empty_array_goes_generic() {
        let codec = WireCodec::default();
        let value = Value::Array(NdArray::from_vec(Vec::<f64>::new()));
        let packed = codec.pack(&value).unwrap();
        assert_eq!(packed.message.header.kind, MessageKind::Generic);
        assert_eq!(roundtrip(&codec, &value), value);
    }

    #[test]
    fn test_missing_or_short_overflow() {
        let codec = WireCodec::default();
        let value = Value::Bytes(vec![0; 1000]);
        let packed = codec.pack(&value).unwrap();
        assert!(codec.unpack(&packed.message, None).is_err());
        let short = Some(Overflow::Owned(vec![0; 10]));
        assert!(codec.unpack(&packed.message, short).is_err());
    }

    #[test]
    fn test_oversized_limit_rejects_long_prefixes() {
        let codec = WireCodec::new(40_000, SerializerKind::Bincode);
        let text = Value::str("y".repeat(33_000));
        assert!(matches!(codec.pack(&text), Err(Error::SerializationFailed(_))));
        assert_eq!(roundtrip(&codec, &Value::str("short")), Value::str("short"));
    }

    #[test]
    fn test_garbage_generic_payload() {
        let codec = WireCodec::default();
        let message = WireMessage::new(WireHeader::new(MessageKind::Generic)).with_prefix(&[0xff; 4]).unwrap();
        assert!(matches!(
            codec.unpack(&message, None),
            Err(Error::DeserializationFailed(_))
        ));
    }

    #[test]
    fn test_serializer_names() {
        assert_eq!(SerializerKind::from_name("MsgPack"), Some(SerializerKind::MessagePack));
        assert_eq!(SerializerKind::from_name("postcard"), Some(SerializerKind::Postcard));
        assert_eq!(SerializerKind::from_name("json"), None);
    }
}
