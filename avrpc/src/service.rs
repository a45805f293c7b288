use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use foldhash::fast::RandomState;

use crate::error::{Error, ErrorKind, Result};
use crate::schema::{Schema, Value};

/// Operation descriptor within a protocol.
#[derive(Debug, Clone)]
pub struct Message {
    pub name: String,
    pub doc: Option<String>,
    /// Record of positional parameters.
    pub request: Arc<Schema>,
    pub response: Arc<Schema>,
    /// Union whose first branch is `string`, the system error branch.
    pub errors: Arc<Schema>,
    pub one_way: bool,
}

impl Message {
    /// The reserved connection probe: empty name, empty request.
    pub(crate) fn ping() -> Arc<Message> {
        static PING: LazyLock<Arc<Message>> = LazyLock::new(|| {
            Arc::new(Message {
                name: String::new(),
                doc: None,
                request: Arc::new(Schema::Record {
                    name: "ping_request".to_string(),
                    fields: Vec::new(),
                }),
                response: Arc::new(Schema::Union(vec![Arc::new(Schema::String)])),
                errors: Arc::new(Schema::Union(vec![Arc::new(Schema::String)])),
                one_way: false,
            })
        });
        PING.clone()
    }

    pub(crate) fn is_ping(&self) -> bool {
        self.name.is_empty()
    }
}

/// Named protocol: an ordered set of types and a table of messages, with a
/// stable fingerprint over the canonical protocol document. Immutable after
/// construction.
pub struct Service {
    name: String,
    doc: Option<String>,
    types: Vec<Arc<Schema>>,
    messages: HashMap<String, Arc<Message>, RandomState>,
    fingerprint: [u8; 16],
    json: String,
}

fn invalid(msg: String) -> Error {
    Error::new(ErrorKind::InvalidProtocol, msg)
}

impl Service {
    /// Constructs a service from a protocol JSON document.
    pub fn from_json(json: &str) -> Result<Arc<Service>> {
        let doc: serde_json::Value = serde_json::from_str(json)?;
        let obj = doc
            .as_object()
            .ok_or_else(|| invalid("protocol document is not an object".to_string()))?;

        let protocol = obj
            .get("protocol")
            .and_then(|p| p.as_str())
            .ok_or_else(|| invalid("missing protocol name".to_string()))?;
        let namespace = obj.get("namespace").and_then(|n| n.as_str());
        let name = if protocol.contains('.') || namespace.is_none() {
            protocol.to_string()
        } else {
            format!("{}.{protocol}", namespace.unwrap_or_default())
        };

        let mut names = crate::schema::NameRegistry::default();
        let mut types = Vec::new();
        if let Some(raw_types) = obj.get("types") {
            let list = raw_types
                .as_array()
                .ok_or_else(|| invalid("protocol types is not an array".to_string()))?;
            for raw in list {
                types.push(Schema::parse_with(raw, &mut names, namespace)?);
            }
        }

        let mut messages = HashMap::default();
        if let Some(raw_messages) = obj.get("messages") {
            let map = raw_messages
                .as_object()
                .ok_or_else(|| invalid("protocol messages is not an object".to_string()))?;
            for (msg_name, raw) in map {
                let message = parse_message(msg_name, raw, &mut names, namespace)?;
                messages.insert(msg_name.clone(), Arc::new(message));
            }
        }

        let mut service = Service {
            name,
            doc: obj
                .get("doc")
                .and_then(|d| d.as_str())
                .map(ToString::to_string),
            types,
            messages,
            fingerprint: [0; 16],
            json: json.to_string(),
        };
        service.fingerprint = md5::compute(service.canonical_form()).0;
        Ok(Arc::new(service))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    #[must_use]
    pub fn message(&self, name: &str) -> Option<Arc<Message>> {
        self.messages.get(name).cloned()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Arc<Message>> {
        self.messages.values()
    }

    #[must_use]
    pub fn types(&self) -> &[Arc<Schema>] {
        &self.types
    }

    #[must_use]
    pub fn fingerprint(&self) -> [u8; 16] {
        self.fingerprint
    }

    #[must_use]
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// The protocol document exchanged during handshakes.
    #[must_use]
    pub fn protocol_json(&self) -> &str {
        &self.json
    }

    /// Canonical JSON of the protocol document, the input to the fingerprint.
    #[must_use]
    pub fn canonical_form(&self) -> String {
        let mut out = String::new();
        out.push_str("{\"protocol\":\"");
        out.push_str(&self.name);
        out.push_str("\",\"types\":[");
        for (i, schema) in self.types.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            schema.write_canonical(&mut out);
        }
        out.push_str("],\"messages\":{");
        let mut msg_names: Vec<&String> = self.messages.keys().collect();
        msg_names.sort();
        for (i, msg_name) in msg_names.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let msg = &self.messages[*msg_name];
            out.push('"');
            out.push_str(msg_name);
            out.push_str("\":{\"request\":[");
            if let Schema::Record { fields, .. } = msg.request.as_ref() {
                for (j, field) in fields.iter().enumerate() {
                    if j > 0 {
                        out.push(',');
                    }
                    out.push_str("{\"name\":\"");
                    out.push_str(&field.name);
                    out.push_str("\",\"type\":");
                    field.schema.write_canonical(&mut out);
                    out.push('}');
                }
            }
            out.push_str("],\"response\":");
            msg.response.write_canonical(&mut out);
            out.push_str(",\"errors\":");
            msg.errors.write_canonical(&mut out);
            if msg.one_way {
                out.push_str(",\"one-way\":true");
            }
            out.push('}');
        }
        out.push_str("}}");
        out
    }
}

fn parse_message(
    name: &str,
    raw: &serde_json::Value,
    names: &mut crate::schema::NameRegistry,
    namespace: Option<&str>,
) -> Result<Message> {
    let obj = raw
        .as_object()
        .ok_or_else(|| invalid(format!("message {name} is not an object")))?;

    let raw_fields = obj
        .get("request")
        .and_then(|r| r.as_array())
        .ok_or_else(|| invalid(format!("message {name} without request")))?;
    let request_json = serde_json::json!({
        "type": "record",
        "name": format!("{name}_request"),
        "fields": raw_fields,
    });
    let request = Schema::parse_with(&request_json, names, namespace)?;

    let response = match obj.get("response") {
        Some(r) => Schema::parse_with(r, names, namespace)?,
        None => Arc::new(Schema::Null),
    };

    let mut error_branches = vec![Arc::new(Schema::String)];
    if let Some(raw_errors) = obj.get("errors") {
        let list = raw_errors
            .as_array()
            .ok_or_else(|| invalid(format!("message {name} errors is not an array")))?;
        for raw in list {
            error_branches.push(Schema::parse_with(raw, names, namespace)?);
        }
    }

    let one_way = obj.get("one-way").and_then(serde_json::Value::as_bool) == Some(true);
    if one_way {
        if !response.is_null() {
            return Err(invalid(format!(
                "one-way message {name} with a response type"
            )));
        }
        if error_branches.len() > 1 {
            return Err(invalid(format!(
                "one-way message {name} with declared errors"
            )));
        }
    }

    Ok(Message {
        name: name.to_string(),
        doc: obj
            .get("doc")
            .and_then(|d| d.as_str())
            .map(ToString::to_string),
        request,
        response,
        errors: Arc::new(Schema::Union(error_branches)),
        one_way,
    })
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("messages", &self.messages.keys())
            .finish()
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builds the positional request record for a message.
#[must_use]
pub fn request_record(message: &Message, args: Vec<Value>) -> Value {
    let mut fields = Vec::with_capacity(args.len());
    if let Schema::Record { fields: schema_fields, .. } = message.request.as_ref() {
        for (field, value) in schema_fields.iter().zip(args) {
            fields.push((field.name.clone(), value));
        }
    }
    Value::Record(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_PROTOCOL: &str =
        r#"{"protocol":"Ping","messages":{"ping":{"request":[],"response":"string"}}}"#;

    #[test]
    fn test_parse_protocol() {
        let svc = Service::from_json(PING_PROTOCOL).unwrap();
        assert_eq!(svc.name(), "Ping");
        let msg = svc.message("ping").unwrap();
        assert!(!msg.one_way);
        assert!(matches!(msg.response.as_ref(), Schema::String));
        assert!(svc.message("pong").is_none());
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = Service::from_json(PING_PROTOCOL).unwrap();
        let b = Service::from_json(
            r#"{"messages":{"ping":{"response":"string","request":[]}},"protocol":"Ping"}"#,
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = Service::from_json(
            r#"{"protocol":"Ping2","messages":{"ping":{"request":[],"response":"string"}}}"#,
        )
        .unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_error_union_layout() {
        let svc = Service::from_json(
            r#"{"protocol":"Math","types":[
                {"type":"record","name":"DivByZero","fields":[]}],
                "messages":{"divide":{
                    "request":[{"name":"a","type":"int"},{"name":"b","type":"int"}],
                    "response":"int","errors":["DivByZero"]}}}"#,
        )
        .unwrap();
        let msg = svc.message("divide").unwrap();
        match msg.errors.as_ref() {
            Schema::Union(branches) => {
                assert_eq!(branches.len(), 2);
                assert!(matches!(branches[0].as_ref(), Schema::String));
                assert!(matches!(branches[1].as_ref(), Schema::Record { .. }));
            }
            other => panic!("errors is not a union: {other:?}"),
        }
    }

    #[test]
    fn test_one_way_invariant() {
        let err = Service::from_json(
            r#"{"protocol":"P","messages":{"log":{
                "request":[{"name":"line","type":"string"}],
                "response":"string","one-way":true}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidProtocol);

        let svc = Service::from_json(
            r#"{"protocol":"P","messages":{"log":{
                "request":[{"name":"line","type":"string"}],
                "response":"null","one-way":true}}}"#,
        )
        .unwrap();
        assert!(svc.message("log").unwrap().one_way);
    }

    #[test]
    fn test_namespaced_protocol() {
        let svc = Service::from_json(
            r#"{"protocol":"Echo","namespace":"org.example","messages":{}}"#,
        )
        .unwrap();
        assert_eq!(svc.name(), "org.example.Echo");
        assert_eq!(svc.fingerprint_hex().len(), 32);
    }

    #[test]
    fn test_request_record() {
        let svc = Service::from_json(
            r#"{"protocol":"E","messages":{"echo":{
                "request":[{"name":"s","type":"string"}],"response":"string"}}}"#,
        )
        .unwrap();
        let msg = svc.message("echo").unwrap();
        let rec = request_record(&msg, vec![Value::String("hi".into())]);
        assert_eq!(rec.field("s"), Some(&Value::String("hi".into())));
    }

    #[test]
    fn test_ping_message() {
        let ping = Message::ping();
        assert!(ping.is_ping());
        assert!(!ping.one_way);
    }
}
