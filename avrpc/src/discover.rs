use crate::error::{Error, ErrorKind, Result};
use crate::frame::{Dialect, Record};
use crate::handshake::{HandshakeRequest, HandshakeResponse};
use crate::msg::ping_request_body;
use crate::service::Service;
use crate::transport::{Transport, read_record, write_record};

/// Fetches the protocol served by a stateful peer, as its JSON document.
///
/// Opens a minimal probe with an empty protocol: the fingerprints cannot
/// match, so the peer's handshake response carries its full protocol. The
/// transport is consumed; the exchange is a single ping.
pub async fn discover_protocol(mut transport: Transport) -> Result<String> {
    let probe = Service::from_json(r#"{"protocol":"Discover","messages":{}}"#)?;
    let hreq = HandshakeRequest {
        client_hash: probe.fingerprint(),
        client_protocol: Some(probe.protocol_json().to_string()),
        server_hash: probe.fingerprint(),
        meta: None,
    };
    let record = Record::new(Some(0), vec![hreq.encode_to_bytes(), ping_request_body()]);
    write_record(transport.writer.as_mut(), Dialect::Netty, &record).await?;

    let response = read_record(transport.reader.as_mut(), Dialect::Netty).await?;
    let mut body = response.body();
    let hres = HandshakeResponse::decode(&mut body)?;
    hres.server_protocol.ok_or_else(|| {
        Error::new(
            ErrorKind::UnknownProtocol,
            "peer did not send its protocol".to_string(),
        )
    })
}
