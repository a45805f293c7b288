use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::schema::{
    Value, read_bool, read_bytes_map, read_string, write_bool, write_bytes_map, write_long,
    write_string,
};
use crate::service::Message;

/// Per-call headers: an Avro `map<bytes>`.
pub type Headers = crate::schema::BytesMap;

/// The in-flight request envelope middleware observes and mutates.
/// Encodes as `headers ‖ name ‖ request`.
#[derive(Debug, Clone)]
pub struct WrappedRequest {
    pub message: Arc<Message>,
    pub headers: Headers,
    pub body: Value,
}

impl WrappedRequest {
    #[must_use]
    pub fn new(message: Arc<Message>, body: Value) -> Self {
        Self {
            message,
            headers: Headers::default(),
            body,
        }
    }

    pub(crate) fn encode_to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        write_bytes_map(&mut buf, &self.headers)?;
        write_string(&mut buf, &self.message.name)?;
        self.message.request.encode(&self.body, &mut buf)?;
        Ok(buf.into())
    }
}

/// The in-flight response envelope. Exactly one of `error`/`response` is set
/// for non-one-way calls. Encodes as `headers ‖ hasError ‖ (error | response)`.
#[derive(Debug, Clone, Default)]
pub struct WrappedResponse {
    pub headers: Headers,
    pub error: Option<Value>,
    pub response: Option<Value>,
}

impl WrappedResponse {
    /// A populated envelope short-circuits the remaining forward middleware
    /// and the transition.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.error.is_some() || self.response.is_some()
    }

    pub(crate) fn encode_to_bytes(&self, message: &Message) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        write_bytes_map(&mut buf, &self.headers)?;
        match &self.error {
            Some(error) => {
                write_bool(&mut buf, true);
                message.errors.encode(error, &mut buf)?;
            }
            None => {
                write_bool(&mut buf, false);
                message
                    .response
                    .encode(self.response.as_ref().unwrap_or(&Value::Null), &mut buf)?;
            }
        }
        Ok(buf.into())
    }
}

/// Reads the header map and message name off the front of a request body,
/// leaving the encoded request parameters in `buf`.
pub(crate) fn read_request_prefix(buf: &mut Bytes) -> Result<(Headers, String)> {
    let headers = read_bytes_map(buf)?;
    let name = read_string(buf)?;
    Ok((headers, name))
}

/// Reads the header map and error flag off the front of a response body.
pub(crate) fn read_response_prefix(buf: &mut Bytes) -> Result<(Headers, bool)> {
    let headers = read_bytes_map(buf)?;
    let has_error = read_bool(buf)?;
    Ok((headers, has_error))
}

/// A system error body: empty headers, error flag set, string branch of the
/// error union. Valid for every message, since the string branch is always
/// first.
#[must_use]
pub(crate) fn system_error_body(msg: &str) -> Bytes {
    let mut buf = BytesMut::new();
    let _ = write_bytes_map(&mut buf, &Headers::default());
    write_bool(&mut buf, true);
    write_long(&mut buf, 0);
    let _ = write_string(&mut buf, msg);
    buf.into()
}

/// The body of the built-in ping probe: empty headers, empty message name,
/// empty request record.
#[must_use]
pub(crate) fn ping_request_body() -> Bytes {
    let mut buf = BytesMut::new();
    let _ = write_bytes_map(&mut buf, &Headers::default());
    let _ = write_string(&mut buf, "");
    buf.into()
}

/// The reply to the built-in ping probe: empty headers, no error, empty
/// string response.
#[must_use]
pub(crate) fn ping_response_body() -> Bytes {
    let mut buf = BytesMut::new();
    let _ = write_bytes_map(&mut buf, &Headers::default());
    write_bool(&mut buf, false);
    write_long(&mut buf, 0);
    let _ = write_string(&mut buf, "");
    buf.into()
}
