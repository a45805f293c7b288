use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorKind, Result};

/// Upper bound on a single framed payload, guarding against corrupt length
/// prefixes.
const MAX_FRAME_SIZE: usize = 64 << 20;

const LEN_SIZE: usize = std::mem::size_of::<u32>();

/// One wire record: an optional 32-bit id and an ordered list of payload
/// frames. The payload frames of one record form a single logical message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: Option<u32>,
    pub payload: Vec<Bytes>,
}

impl Record {
    #[must_use]
    pub fn new(id: Option<u32>, payload: Vec<Bytes>) -> Self {
        Self { id, payload }
    }

    /// Concatenates the payload frames into one buffer.
    #[must_use]
    pub fn body(&self) -> Bytes {
        match self.payload.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            frames => {
                let mut buf = BytesMut::with_capacity(frames.iter().map(Bytes::len).sum());
                for frame in frames {
                    buf.extend_from_slice(frame);
                }
                buf.into()
            }
        }
    }
}

/// Wire dialect for framed records. The two dialects are not interchangeable;
/// both peers of a channel must agree on one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// A record is a sequence of length-prefixed frames closed by a
    /// zero-length frame; it carries no id.
    Standard,
    /// A record starts with an `[id, frame_count]` header followed by that
    /// many length-prefixed frames; no terminator.
    Netty,
}

impl Dialect {
    /// Default dialect for a channel flavor.
    #[must_use]
    pub fn for_stateful(stateful: bool) -> Self {
        if stateful { Dialect::Netty } else { Dialect::Standard }
    }

    pub fn encode(self, record: &Record, buf: &mut BytesMut) -> Result<()> {
        for frame in &record.payload {
            if frame.len() > MAX_FRAME_SIZE {
                return Err(Error::new(
                    ErrorKind::FramingFailed,
                    format!("frame is too long: {}", frame.len()),
                ));
            }
        }
        match self {
            Dialect::Standard => {
                for frame in &record.payload {
                    buf.put_u32(frame.len() as u32);
                    buf.put_slice(frame);
                }
                buf.put_u32(0);
            }
            Dialect::Netty => {
                buf.put_u32(record.id.unwrap_or(0));
                buf.put_u32(record.payload.len() as u32);
                for frame in &record.payload {
                    buf.put_u32(frame.len() as u32);
                    buf.put_slice(frame);
                }
            }
        }
        Ok(())
    }

    /// Extracts the next complete record from `buffer`, leaving partial input
    /// in place for a later call. Packet boundaries may fall anywhere.
    pub fn parse(self, buffer: &mut BytesMut) -> Result<Option<Record>> {
        match self {
            Dialect::Standard => Self::parse_standard(buffer),
            Dialect::Netty => Self::parse_netty(buffer),
        }
    }

    fn frame_len_at(buffer: &BytesMut, offset: usize) -> Result<Option<usize>> {
        if buffer.len() < offset + LEN_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes(buffer[offset..offset + LEN_SIZE].try_into().unwrap()) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(Error::new(
                ErrorKind::FramingFailed,
                format!("frame is too long: {len}"),
            ));
        }
        Ok(Some(len))
    }

    fn parse_standard(buffer: &mut BytesMut) -> Result<Option<Record>> {
        // scan for the zero-length terminator before consuming anything
        let mut offset = 0;
        loop {
            let Some(len) = Self::frame_len_at(buffer, offset)? else {
                return Ok(None);
            };
            offset += LEN_SIZE;
            if len == 0 {
                break;
            }
            if buffer.len() < offset + len {
                return Ok(None);
            }
            offset += len;
        }

        let mut frames = Vec::new();
        loop {
            let len = u32::from_be_bytes(buffer[..LEN_SIZE].try_into().unwrap()) as usize;
            buffer.advance(LEN_SIZE);
            if len == 0 {
                return Ok(Some(Record::new(None, frames)));
            }
            frames.push(buffer.split_to(len).into());
        }
    }

    fn parse_netty(buffer: &mut BytesMut) -> Result<Option<Record>> {
        const HEADER_SIZE: usize = 2 * LEN_SIZE;
        if buffer.len() < HEADER_SIZE {
            return Ok(None);
        }
        let count = u32::from_be_bytes(buffer[LEN_SIZE..HEADER_SIZE].try_into().unwrap()) as usize;
        if count > MAX_FRAME_SIZE / LEN_SIZE {
            return Err(Error::new(
                ErrorKind::FramingFailed,
                format!("invalid frame count: {count}"),
            ));
        }

        let mut offset = HEADER_SIZE;
        for _ in 0..count {
            let Some(len) = Self::frame_len_at(buffer, offset)? else {
                return Ok(None);
            };
            offset += LEN_SIZE;
            if buffer.len() < offset + len {
                return Ok(None);
            }
            offset += len;
        }

        let id = u32::from_be_bytes(buffer[..LEN_SIZE].try_into().unwrap());
        buffer.advance(HEADER_SIZE);
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let len = u32::from_be_bytes(buffer[..LEN_SIZE].try_into().unwrap()) as usize;
            buffer.advance(LEN_SIZE);
            frames.push(buffer.split_to(len).into());
        }
        Ok(Some(Record::new(Some(id), frames)))
    }

    /// Validates that no partial record remains buffered at end of stream.
    pub fn finish(self, buffer: &BytesMut) -> Result<()> {
        if buffer.is_empty() {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::FramingFailed,
                format!("{} trailing bytes after last record", buffer.len()),
            ))
        }
    }
}
