//! Fixed-size first frame.
//!
//! Layout (little endian, 32 bytes, followed by the inline prefix):
//!
//! | offset | field                    | type |
//! |--------|--------------------------|------|
//! | 0      | double payload           | f64  |
//! | 8      | long payload             | i64  |
//! | 16     | bytes in second message  | i32  |
//! | 20     | message kind             | i32  |
//! | 24     | free overflow buffer     | i16  |
//! | 26     | bytes in prefix          | i16  |
//! | 28     | padding                  | 4    |
use std::convert::TryFrom;
use crate::{Error, Result};

pub const HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageKind {
    Long = 0,
    Double = 1,
    String = 2,
    Array = 3,
    Generic = 4,
}

impl TryFrom<i32> for MessageKind {
    type Error = Error;

    fn try_from(code: i32) -> Result<MessageKind> {
        match code {
            0 => Ok(MessageKind::Long),
            1 => Ok(MessageKind::Double),
            2 => Ok(MessageKind::String),
            3 => Ok(MessageKind::Array),
            4 => Ok(MessageKind::Generic),
            _ => Err(Error::UnsupportedEncoding(code)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireHeader {
    pub double_payload: f64,
    pub long_payload: i64,
    /// Length of the overflow payload, 0 if there is none
    pub bytes_in_second_message: i32,
    pub kind: MessageKind,
    /// Whether the sender allocated the overflow buffer
    pub free_overflow_buffer: bool,
    /// Valid bytes in the inline prefix
    pub bytes_in_prefix: i16,
}

impl WireHeader {
    pub fn new(kind: MessageKind) -> WireHeader {
        WireHeader {
            double_payload: 0.0,
            long_payload: 0,
            bytes_in_second_message: 0,
            kind,
            free_overflow_buffer: false,
            bytes_in_prefix: 0,
        }
    }

    pub fn encode(&self, out: &mut [u8; HEADER_SIZE]) {
        out[0..8].copy_from_slice(&self.double_payload.to_le_bytes());
        out[8..16].copy_from_slice(&self.long_payload.to_le_bytes());
        out[16..20].copy_from_slice(&self.bytes_in_second_message.to_le_bytes());
        out[20..24].copy_from_slice(&(self.kind as i32).to_le_bytes());
        out[24..26].copy_from_slice(&(self.free_overflow_buffer as i16).to_le_bytes());
        out[26..28].copy_from_slice(&self.bytes_in_prefix.to_le_bytes());
        out[28..32].fill(0);
    }

    pub fn decode(buf: &[u8]) -> Result<WireHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::DeserializationFailed(format!(
                "frame of {} bytes is shorter than the header",
                buf.len(),
            )));
        }
        let mut b8 = [0u8; 8];
        let mut b4 = [0u8; 4];
        let mut b2 = [0u8; 2];

        b8.copy_from_slice(&buf[0..8]);
        let double_payload = f64::from_le_bytes(b8);
        b8.copy_from_slice(&buf[8..16]);
        let long_payload = i64::from_le_bytes(b8);
        b4.copy_from_slice(&buf[16..20]);
        let bytes_in_second_message = i32::from_le_bytes(b4);
        b4.copy_from_slice(&buf[20..24]);
        let kind = MessageKind::try_from(i32::from_le_bytes(b4))?;
        b2.copy_from_slice(&buf[24..26]);
        let free_overflow_buffer = i16::from_le_bytes(b2) != 0;
        b2.copy_from_slice(&buf[26..28]);
        let bytes_in_prefix = i16::from_le_bytes(b2);

        if bytes_in_second_message < 0 || bytes_in_prefix < 0 {
            return Err(Error::DeserializationFailed("negative length in header".into()));
        }
        Ok(WireHeader {
            double_payload,
            long_payload,
            bytes_in_second_message,
            kind,
            free_overflow_buffer,
            bytes_in_prefix,
        })
    }

    /// Overflow length in bytes.
    pub fn overflow_len(&self) -> usize {
        self.bytes_in_second_message.max(0) as usize
    }
}

/// Header plus inline prefix: the first frame of every message.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub header: WireHeader,
    pub prefix: Vec<u8>,
}

impl WireMessage {
    pub fn new(header: WireHeader) -> WireMessage {
        WireMessage {
            header,
            prefix: vec![],
        }
    }

    /// Store `bytes` inline. The caller checks them against the frame size.
    pub(crate) fn with_prefix(mut self, bytes: &[u8]) -> Result<WireMessage> {
        self.header.bytes_in_prefix = i16::try_from(bytes.len()).map_err(|_| {
            Error::SerializationFailed(format!(
                "prefix of {} bytes exceeds the header's length field",
                bytes.len(),
            ))
        })?;
        self.prefix = bytes.to_vec();
        Ok(self)
    }

    /// Serialize to a frame of exactly `frame_len` bytes.
    pub fn to_frame(&self, frame_len: usize) -> Result<Vec<u8>> {
        if HEADER_SIZE + self.prefix.len() > frame_len {
            return Err(Error::SerializationFailed(format!(
                "prefix of {} bytes does not fit a {} byte frame",
                self.prefix.len(),
                frame_len,
            )));
        }
        let mut header = [0u8; HEADER_SIZE];
        self.header.encode(&mut header);
        let mut frame = vec![0u8; frame_len];
        frame[..HEADER_SIZE].copy_from_slice(&header);
        frame[HEADER_SIZE..HEADER_SIZE + self.prefix.len()].copy_from_slice(&self.prefix);
        Ok(frame)
    }

    pub fn from_frame(frame: &[u8]) -> Result<WireMessage> {
        let header = WireHeader::decode(frame)?;
        let end = HEADER_SIZE + header.bytes_in_prefix as usize;
        if end > frame.len() {
            return Err(Error::DeserializationFailed(format!(
                "prefix length {} exceeds the frame",
                header.bytes_in_prefix,
            )));
        }
        Ok(WireMessage {
            header,
            prefix: frame[HEADER_SIZE..end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = WireHeader::new(MessageKind::Generic);
        header.double_payload = 1.5;
        header.long_payload = -7;
        header.bytes_in_second_message = 1000;
        header.free_overflow_buffer = true;
        let mut out = [0xffu8; HEADER_SIZE];
        header.encode(&mut out);
        assert_eq!(&out[0..8], &1.5f64.to_le_bytes());
        assert_eq!(&out[16..20], &1000i32.to_le_bytes());
        assert_eq!(&out[20..24], &4i32.to_le_bytes());
        assert_eq!(&out[28..32], &[0, 0, 0, 0]);
        assert_eq!(WireHeader::decode(&out).unwrap(), header);
    }

    #[test]
    fn test_unknown_kind() {
        let mut out = [0u8; HEADER_SIZE];
        WireHeader::new(MessageKind::Long).encode(&mut out);
        out[20..24].copy_from_slice(&42i32.to_le_bytes());
        assert_eq!(WireHeader::decode(&out), Err(Error::UnsupportedEncoding(42)));
    }

    #[test]
    fn test_frame_is_fixed_size() {
        let msg = WireMessage::new(WireHeader::new(MessageKind::String)).with_prefix(b"abc").unwrap();
        let frame = msg.to_frame(64).unwrap();
        assert_eq!(frame.len(), 64);
        assert_eq!(WireMessage::from_frame(&frame).unwrap(), msg);
        assert!(msg.to_frame(HEADER_SIZE + 2).is_err());
    }

    #[test]
    fn test_prefix_length_must_fit_the_header() {
        let msg = WireMessage::new(WireHeader::new(MessageKind::String));
        assert!(msg.clone().with_prefix(&[0u8; i16::MAX as usize]).is_ok());
        assert!(matches!(
            msg.with_prefix(&[0u8; i16::MAX as usize + 1]),
            Err(Error::SerializationFailed(_))
        ));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(WireMessage::from_frame(&[0u8; 10]).is_err());
    }
}
