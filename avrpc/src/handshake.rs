use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorKind, Result};
use crate::schema::{
    BytesMap, read_bytes_map, read_fixed, read_long, read_string, write_bytes_map, write_long,
    write_string,
};

pub(crate) const HASH_SIZE: usize = 16;

/// Outcome of a handshake round: whether neither, only the server's, or both
/// protocols had to travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeMatch {
    Both,
    Client,
    None,
}

impl HandshakeMatch {
    fn index(self) -> i64 {
        match self {
            HandshakeMatch::Both => 0,
            HandshakeMatch::Client => 1,
            HandshakeMatch::None => 2,
        }
    }

    fn from_index(index: i64) -> Result<Self> {
        match index {
            0 => Ok(HandshakeMatch::Both),
            1 => Ok(HandshakeMatch::Client),
            2 => Ok(HandshakeMatch::None),
            other => Err(Error::new(
                ErrorKind::InvalidHandshakeResponse,
                format!("invalid match index: {other}"),
            )),
        }
    }
}

/// The fixed handshake request record:
/// `{clientHash: fixed(16), clientProtocol: union(null, string),
///   serverHash: fixed(16), meta: union(null, map<bytes>)}`.
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeRequest {
    pub client_hash: [u8; HASH_SIZE],
    pub client_protocol: Option<String>,
    pub server_hash: [u8; HASH_SIZE],
    pub meta: Option<BytesMap>,
}

impl HandshakeRequest {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&self.client_hash);
        match &self.client_protocol {
            None => write_long(buf, 0),
            Some(protocol) => {
                write_long(buf, 1);
                write_string(buf, protocol)?;
            }
        }
        buf.put_slice(&self.server_hash);
        encode_meta(buf, self.meta.as_ref())
    }

    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        // encoding a handshake request cannot fail: strings and maps are
        // length-checked only on the decode side
        let _ = self.encode(&mut buf);
        buf.into()
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let wrap = |e: Error| Error::new(ErrorKind::InvalidHandshakeRequest, e.to_string());
        let client_hash = read_hash(buf).map_err(wrap)?;
        let client_protocol = match read_long(buf).map_err(wrap)? {
            0 => None,
            1 => Some(read_string(buf).map_err(wrap)?),
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidHandshakeRequest,
                    format!("invalid clientProtocol union index: {other}"),
                ));
            }
        };
        let server_hash = read_hash(buf).map_err(wrap)?;
        let meta = decode_meta(buf).map_err(wrap)?;
        Ok(Self {
            client_hash,
            client_protocol,
            server_hash,
            meta,
        })
    }
}

/// The fixed handshake response record:
/// `{match: enum(BOTH, CLIENT, NONE), serverProtocol: union(null, string),
///   serverHash: union(null, fixed(16)), meta: union(null, map<bytes>)}`.
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeResponse {
    pub matched: HandshakeMatch,
    pub server_protocol: Option<String>,
    pub server_hash: Option<[u8; HASH_SIZE]>,
    pub meta: Option<BytesMap>,
}

impl HandshakeResponse {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        write_long(buf, self.matched.index());
        match &self.server_protocol {
            None => write_long(buf, 0),
            Some(protocol) => {
                write_long(buf, 1);
                write_string(buf, protocol)?;
            }
        }
        match &self.server_hash {
            None => write_long(buf, 0),
            Some(hash) => {
                write_long(buf, 1);
                buf.put_slice(hash);
            }
        }
        encode_meta(buf, self.meta.as_ref())
    }

    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        let _ = self.encode(&mut buf);
        buf.into()
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let wrap = |e: Error| Error::new(ErrorKind::InvalidHandshakeResponse, e.to_string());
        let matched = HandshakeMatch::from_index(read_long(buf).map_err(wrap)?)?;
        let server_protocol = match read_long(buf).map_err(wrap)? {
            0 => None,
            1 => Some(read_string(buf).map_err(wrap)?),
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidHandshakeResponse,
                    format!("invalid serverProtocol union index: {other}"),
                ));
            }
        };
        let server_hash = match read_long(buf).map_err(wrap)? {
            0 => None,
            1 => Some(read_hash(buf).map_err(wrap)?),
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidHandshakeResponse,
                    format!("invalid serverHash union index: {other}"),
                ));
            }
        };
        let meta = decode_meta(buf).map_err(wrap)?;
        Ok(Self {
            matched,
            server_protocol,
            server_hash,
            meta,
        })
    }
}

fn read_hash(buf: &mut Bytes) -> Result<[u8; HASH_SIZE]> {
    let raw = read_fixed(buf, HASH_SIZE)?;
    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(&raw);
    Ok(hash)
}

fn encode_meta(buf: &mut BytesMut, meta: Option<&BytesMap>) -> Result<()> {
    match meta {
        None => {
            write_long(buf, 0);
            Ok(())
        }
        Some(map) => {
            write_long(buf, 1);
            write_bytes_map(buf, map)
        }
    }
}

fn decode_meta(buf: &mut Bytes) -> Result<Option<BytesMap>> {
    match read_long(buf)? {
        0 => Ok(None),
        1 => Ok(Some(read_bytes_map(buf)?)),
        other => Err(Error::new(
            ErrorKind::DeserializeFailed,
            format!("invalid meta union index: {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let req = HandshakeRequest {
            client_hash: [1; HASH_SIZE],
            client_protocol: Some("{\"protocol\":\"P\"}".to_string()),
            server_hash: [2; HASH_SIZE],
            meta: None,
        };
        let mut bytes = req.encode_to_bytes();
        assert_eq!(HandshakeRequest::decode(&mut bytes).unwrap(), req);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_request_without_protocol() {
        let req = HandshakeRequest {
            client_hash: [3; HASH_SIZE],
            client_protocol: None,
            server_hash: [3; HASH_SIZE],
            meta: None,
        };
        // fixed(16) + null union + fixed(16) + null union
        assert_eq!(req.encode_to_bytes().len(), 2 * HASH_SIZE + 2);
    }

    #[test]
    fn test_response_round_trip() {
        let mut meta = BytesMap::default();
        meta.insert("k".into(), Bytes::from_static(b"v"));
        let res = HandshakeResponse {
            matched: HandshakeMatch::Client,
            server_protocol: Some("{}".to_string()),
            server_hash: Some([9; HASH_SIZE]),
            meta: Some(meta),
        };
        let mut bytes = res.encode_to_bytes();
        assert_eq!(HandshakeResponse::decode(&mut bytes).unwrap(), res);
    }

    #[test]
    fn test_truncated_request() {
        let mut bytes = Bytes::from_static(&[0u8; 10]);
        let err = HandshakeRequest::decode(&mut bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidHandshakeRequest);
    }

    #[test]
    fn test_invalid_match_index() {
        let mut buf = BytesMut::new();
        write_long(&mut buf, 7);
        let mut bytes: Bytes = buf.into();
        let err = HandshakeResponse::decode(&mut bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidHandshakeResponse);
    }
}
