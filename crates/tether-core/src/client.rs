//! Request/response multiplexing over a session.
//!
//! Every data frame starts with a schema-declared package header carrying
//! the protocol `type` tag and, for calls expecting an answer, a client
//! allocated `session` number. The client matches inbound responses back to
//! their callers by that number and routes inbound requests to registered
//! handlers.
//!
//! Calls return a [`CallHandle`] the caller polls from the same tick loop
//! that drives [`Client::update`]; nothing here suspends or blocks. A
//! handle settles when the matching response arrives, when its decode
//! fails, or when the session closes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, warn};

use tether_proto::{pack, unpack, Fields, Schema, TypeRef, Value};

use crate::entropy::Entropy;
use crate::error::ClientError;
use crate::session::{ReconnectCallback, Session, Tick};
use crate::socket::FrameSocket;

/// Package type assumed when none is named.
pub const DEFAULT_PACKAGE_TYPE: &str = "base.package";

/// Handler for inbound requests. The return value, if any, is serialized as
/// the protocol's response.
pub type Handler = Box<dyn FnMut(&Value) -> Option<Value>>;

type ResponseSlot = Rc<RefCell<Option<Result<Value, ClientError>>>>;

/// What a pending call expects back.
enum ResponseKind {
    /// A body decoded against this type
    Typed(TypeRef),
    /// A bodyless acknowledgement
    ConfirmOnly,
}

struct PendingCall {
    protocol: String,
    response: ResponseKind,
    slot: ResponseSlot,
}

/// A poll-style future for one call.
pub struct CallHandle {
    slot: ResponseSlot,
}

impl CallHandle {
    /// Take the settled result, or `None` while the call is in flight.
    ///
    /// Drive [`Client::update`] between polls; the handle settles from
    /// there.
    #[must_use]
    pub fn poll(&self) -> Option<Result<Value, ClientError>> {
        self.slot.borrow_mut().take()
    }
}

/// The session host: schema, session, pending calls, handlers.
pub struct Client<S: FrameSocket> {
    schema: Schema,
    package: TypeRef,
    session: Session<S>,
    next_session: u32,
    pending: HashMap<u32, PendingCall>,
    handlers: HashMap<String, Handler>,
}

impl<S: FrameSocket> Client<S> {
    /// Connect with the standard package type name.
    ///
    /// # Errors
    ///
    /// See [`Client::connect_with_package`].
    pub fn connect(
        schema: Schema,
        socket: S,
        target: &str,
        flag: &str,
        entropy: &mut dyn Entropy,
    ) -> Result<Self, ClientError> {
        Self::connect_with_package(schema, socket, target, flag, entropy, DEFAULT_PACKAGE_TYPE)
    }

    /// Connect, naming the schema type used as the package header.
    ///
    /// # Errors
    ///
    /// [`ClientError::MissingPackageType`] if the schema lacks the package
    /// type, or a session error if the handshake cannot be sent.
    pub fn connect_with_package(
        schema: Schema,
        socket: S,
        target: &str,
        flag: &str,
        entropy: &mut dyn Entropy,
        package_type: &str,
    ) -> Result<Self, ClientError> {
        let package = schema
            .type_by_name(package_type)
            .ok_or_else(|| ClientError::MissingPackageType { name: package_type.to_string() })?;
        let session = Session::connect(socket, target, flag, entropy)?;
        Ok(Self {
            schema,
            package,
            session,
            next_session: 1,
            pending: HashMap::new(),
            handlers: HashMap::new(),
        })
    }

    /// Load a bundle and connect in one step.
    ///
    /// # Errors
    ///
    /// Schema errors from the bundle, plus everything
    /// [`Client::connect_with_package`] reports.
    pub fn from_bundle(
        bundle: &[u8],
        socket: S,
        target: &str,
        flag: &str,
        entropy: &mut dyn Entropy,
        package_type: &str,
    ) -> Result<Self, ClientError> {
        let schema = Schema::load(bundle)?;
        Self::connect_with_package(schema, socket, target, flag, entropy, package_type)
    }

    /// The loaded schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Whether traffic currently flows.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Install a handler for inbound requests on `name`.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownProtocol`] if the schema lacks the protocol,
    /// [`ClientError::DuplicateHandler`] if one is already installed.
    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<(), ClientError>
    where
        F: FnMut(&Value) -> Option<Value> + 'static,
    {
        if self.schema.protocol_by_name(name).is_none() {
            return Err(ClientError::UnknownProtocol { name: name.to_string() });
        }
        if self.handlers.contains_key(name) {
            return Err(ClientError::DuplicateHandler { name: name.to_string() });
        }
        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(())
    }

    /// Issue a request and return a handle that settles on its response.
    ///
    /// # Errors
    ///
    /// Rejects unknown protocols, body/declaration mismatches, protocols
    /// that declare no way to respond, and calls on a dead session.
    pub fn call(&mut self, name: &str, args: Option<&Value>) -> Result<CallHandle, ClientError> {
        if self.session.state().is_terminal() {
            return Err(ClientError::SessionClosed);
        }
        let protocol = self
            .schema
            .protocol_by_name(name)
            .ok_or_else(|| ClientError::UnknownProtocol { name: name.to_string() })?
            .clone();

        let response = match protocol.response {
            Some(ty) => ResponseKind::Typed(ty),
            None if protocol.confirm => ResponseKind::ConfirmOnly,
            None => {
                return Err(ClientError::RequestShape {
                    name: name.to_string(),
                    reason: "declares no response; use invoke",
                })
            }
        };

        let session_id = self.next_session;
        self.next_session = self.next_session.wrapping_add(1);

        let header = Value::record([
            ("type", Value::from(protocol.tag)),
            ("session", Value::from(i64::from(session_id))),
        ]);
        let frame = self.build_frame(&header, protocol.request, args, name)?;
        self.session.send(frame)?;

        let slot: ResponseSlot = Rc::new(RefCell::new(None));
        self.pending.insert(
            session_id,
            PendingCall { protocol: name.to_string(), response, slot: Rc::clone(&slot) },
        );
        debug!(protocol = name, session = session_id, "call issued");
        Ok(CallHandle { slot })
    }

    /// Issue a request that expects no response and no acknowledgement.
    ///
    /// # Errors
    ///
    /// Same shape checks as [`Client::call`], minus the response
    /// requirement.
    pub fn invoke(&mut self, name: &str, args: Option<&Value>) -> Result<(), ClientError> {
        if self.session.state().is_terminal() {
            return Err(ClientError::SessionClosed);
        }
        let protocol = self
            .schema
            .protocol_by_name(name)
            .ok_or_else(|| ClientError::UnknownProtocol { name: name.to_string() })?
            .clone();

        let header = Value::record([("type", Value::from(protocol.tag))]);
        let frame = self.build_frame(&header, protocol.request, args, name)?;
        self.session.send(frame)?;
        debug!(protocol = name, "invoke issued");
        Ok(())
    }

    /// One cooperative tick: pump the session and dispatch whatever frame
    /// it surfaced.
    pub fn update(&mut self) -> Tick {
        let tick = self.session.update();
        while let Some(frame) = self.session.poll_frame() {
            if let Err(err) = self.dispatch(&frame) {
                warn!("inbound frame dropped: {err}");
            }
        }
        tick
    }

    /// Begin a session resume. See [`Session::reconnect`].
    ///
    /// # Errors
    ///
    /// Propagates the session's state and transport errors.
    pub fn reconnect(&mut self, cb: Option<ReconnectCallback>) -> Result<(), ClientError> {
        self.session.reconnect(cb).map_err(Into::into)
    }

    /// Close the session and reject every pending call.
    pub fn close(&mut self) {
        self.session.close();
        for (_, call) in self.pending.drain() {
            debug!(protocol = %call.protocol, "pending call rejected on close");
            *call.slot.borrow_mut() = Some(Err(ClientError::SessionClosed));
        }
    }

    /// Serialize `package header || body` and pack it into one frame.
    fn build_frame(
        &self,
        header: &Value,
        request: Option<TypeRef>,
        args: Option<&Value>,
        name: &str,
    ) -> Result<Bytes, ClientError> {
        let mut bytes = self.schema.encode(self.package, header)?;
        match (request, args) {
            (Some(ty), Some(value)) => bytes.extend(self.schema.encode(ty, value)?),
            (None, None) => {}
            (Some(_), None) => {
                return Err(ClientError::RequestShape {
                    name: name.to_string(),
                    reason: "requires a request body",
                })
            }
            (None, Some(_)) => {
                return Err(ClientError::RequestShape {
                    name: name.to_string(),
                    reason: "takes no request body",
                })
            }
        }
        Ok(Bytes::from(pack(&bytes)?))
    }

    fn dispatch(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        let unpacked = unpack(frame)?;
        let header = self.schema.decode(self.package, &unpacked)?;
        let body = &unpacked[header.used..];

        let proto_tag = header.value.field("type").and_then(Value::as_integer);
        let session = header.value.field("session").and_then(Value::as_integer);

        match proto_tag {
            Some(tag) => self.dispatch_request(tag, session, body),
            None => {
                self.dispatch_response(session, body);
                Ok(())
            }
        }
    }

    /// Inbound request: decode, hand to the handler, send back whatever the
    /// protocol declares.
    fn dispatch_request(
        &mut self,
        tag: i64,
        session: Option<i64>,
        body: &[u8],
    ) -> Result<(), ClientError> {
        let Some(protocol) = self.schema.protocol_by_tag(tag) else {
            warn!(tag, "request for unknown protocol dropped");
            return Ok(());
        };
        let protocol = protocol.clone();

        let request_value = match protocol.request {
            Some(ty) => Some(self.schema.decode(ty, body)?.value),
            None => None,
        };

        let Some(handler) = self.handlers.get_mut(&protocol.name) else {
            warn!(protocol = %protocol.name, "request without a handler dropped");
            return Ok(());
        };
        let empty = Value::Struct(Fields::new());
        let reply = handler(request_value.as_ref().unwrap_or(&empty));

        let Some(session) = session else {
            return Ok(());
        };
        match (protocol.response, reply) {
            (Some(ty), Some(value)) => {
                let header = Value::record([("session", Value::from(session))]);
                let mut bytes = self.schema.encode(self.package, &header)?;
                bytes.extend(self.schema.encode(ty, &value)?);
                self.session.send(Bytes::from(pack(&bytes)?))?;
            }
            (None, _) if protocol.confirm => {
                let header = Value::record([("session", Value::from(session))]);
                let bytes = self.schema.encode(self.package, &header)?;
                self.session.send(Bytes::from(pack(&bytes)?))?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Inbound response: settle the matching pending call. Unmatched
    /// sessions are dropped, not fatal — the server may answer after a
    /// local close or duplicate a reply.
    fn dispatch_response(&mut self, session: Option<i64>, body: &[u8]) {
        let Some(session) = session.and_then(|s| u32::try_from(s).ok()) else {
            warn!("response frame without a usable session id dropped");
            return;
        };
        let Some(call) = self.pending.remove(&session) else {
            debug!(session, "response for unknown session dropped");
            return;
        };

        let result = match call.response {
            ResponseKind::Typed(ty) => self
                .schema
                .decode(ty, body)
                .map(|decoded| decoded.value)
                .map_err(ClientError::from),
            ResponseKind::ConfirmOnly => Ok(Value::Struct(Fields::new())),
        };
        debug!(protocol = %call.protocol, session, ok = result.is_ok(), "call settled");
        *call.slot.borrow_mut() = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{self, DhKey};
    use crate::session::SessionState;
    use crate::testutil::bundle::{assemble, protocol, simple_type};
    use crate::testutil::{FixedEntropy, MockSocket};

    fn fixture_schema() -> Schema {
        let raw = assemble(
            &[
                simple_type("base.package", &[("type", 0, 0), ("session", 1, 0)]),
                simple_type("echo.req", &[("text", 0, 2)]),
                simple_type("echo.resp", &[("text", 0, 2)]),
                simple_type("note.req", &[("n", 0, 0)]),
            ],
            &[
                protocol("echo", 1, Some(1), Some(2), false),
                protocol("ping", 2, None, None, true),
                protocol("note", 3, Some(3), None, false),
            ],
        );
        Schema::load(&raw).expect("fixture schema loads")
    }

    /// Connect and run the handshake against a local server key.
    fn established() -> Client<MockSocket> {
        let mut client = Client::connect(
            fixture_schema(),
            MockSocket::default(),
            "game1",
            "0",
            &mut FixedEntropy(0x21),
        )
        .unwrap();

        let server_key = DhKey::generate(&mut FixedEntropy(0x99));
        let reply = format!("7\n{}\n", crypto::b64_encode(&server_key.public_bytes()));
        client.session.socket_mut().deliver(reply.as_bytes());
        let tick = client.update();
        assert!(tick.ok, "handshake failed: {:?}", tick.error);
        assert!(client.is_connected());
        client
    }

    /// Decode a frame the client sent: `(header, body_bytes)`.
    fn parse_sent(client: &Client<MockSocket>, frame: &[u8]) -> (Value, Vec<u8>) {
        let unpacked = unpack(frame).unwrap();
        let header = client.schema.decode(client.package, &unpacked).unwrap();
        (header.value, unpacked[header.used..].to_vec())
    }

    fn deliver_frame(client: &mut Client<MockSocket>, bytes: &[u8]) {
        let packed = pack(bytes).unwrap();
        client.session.socket_mut().deliver(&packed);
    }

    #[test]
    fn call_round_trip() {
        let mut client = established();
        let echo_resp = client.schema.type_by_name("echo.resp").unwrap();

        let args = Value::record([("text", Value::from("marco"))]);
        let handle = client.call("echo", Some(&args)).unwrap();
        assert!(handle.poll().is_none(), "no response yet");

        // The frame on the wire is pack(header || body).
        let sent = client.session.socket_mut().sent_payloads();
        let (header, body) = parse_sent(&client, sent.last().unwrap());
        assert_eq!(header.field("type").and_then(Value::as_integer), Some(1));
        assert_eq!(header.field("session").and_then(Value::as_integer), Some(1));
        let echo_req = client.schema.type_by_name("echo.req").unwrap();
        let decoded = client.schema.decode(echo_req, &body).unwrap();
        assert_eq!(decoded.value, args);

        // Server responds on session 1 with no `type` field.
        let response = Value::record([("text", Value::from("polo"))]);
        let mut bytes = client
            .schema
            .encode(client.package, &Value::record([("session", Value::from(1i64))]))
            .unwrap();
        bytes.extend(client.schema.encode(echo_resp, &response).unwrap());
        deliver_frame(&mut client, &bytes);

        assert!(client.update().ok);
        let settled = handle.poll().expect("settled").expect("ok");
        assert_eq!(settled, response);
    }

    #[test]
    fn session_ids_allocate_monotonically() {
        let mut client = established();
        let args = Value::record([("text", Value::from("a"))]);
        client.call("echo", Some(&args)).unwrap();
        client.call("echo", Some(&args)).unwrap();

        let sent = client.session.socket_mut().sent_payloads();
        let (h1, _) = parse_sent(&client, &sent[sent.len() - 2]);
        let (h2, _) = parse_sent(&client, &sent[sent.len() - 1]);
        assert_eq!(h1.field("session").and_then(Value::as_integer), Some(1));
        assert_eq!(h2.field("session").and_then(Value::as_integer), Some(2));
    }

    #[test]
    fn confirm_only_call_settles_on_bare_header() {
        let mut client = established();
        let handle = client.call("ping", None).unwrap();

        let bytes = client
            .schema
            .encode(client.package, &Value::record([("session", Value::from(1i64))]))
            .unwrap();
        deliver_frame(&mut client, &bytes);

        assert!(client.update().ok);
        let settled = handle.poll().expect("settled").expect("ok");
        assert_eq!(settled, Value::Struct(Fields::new()));
    }

    #[test]
    fn call_shape_validation() {
        let mut client = established();

        // note declares no response at all
        let args = Value::record([("n", Value::from(1i64))]);
        assert!(matches!(
            client.call("note", Some(&args)),
            Err(ClientError::RequestShape { .. })
        ));

        // echo requires a body
        assert!(matches!(
            client.call("echo", None),
            Err(ClientError::RequestShape { .. })
        ));

        // ping takes none
        let junk = Value::record([("x", Value::from(1i64))]);
        assert!(matches!(
            client.call("ping", Some(&junk)),
            Err(ClientError::RequestShape { .. })
        ));

        assert!(matches!(
            client.call("nope", None),
            Err(ClientError::UnknownProtocol { .. })
        ));
    }

    #[test]
    fn invoke_sends_without_session() {
        let mut client = established();
        let args = Value::record([("n", Value::from(9i64))]);
        client.invoke("note", Some(&args)).unwrap();

        let sent = client.session.socket_mut().sent_payloads();
        let (header, body) = parse_sent(&client, sent.last().unwrap());
        assert_eq!(header.field("type").and_then(Value::as_integer), Some(3));
        assert_eq!(header.field("session"), None);
        assert!(!body.is_empty());
        assert!(client.pending.is_empty());
    }

    #[test]
    fn unmatched_response_session_dropped() {
        let mut client = established();
        let bytes = client
            .schema
            .encode(client.package, &Value::record([("session", Value::from(99i64))]))
            .unwrap();
        deliver_frame(&mut client, &bytes);
        assert!(client.update().ok);
        assert!(client.pending.is_empty());
    }

    #[test]
    fn inbound_request_dispatched_and_answered() {
        let mut client = established();
        client
            .register("echo", |req: &Value| {
                let text = req.field("text").and_then(Value::as_str).unwrap_or("?");
                Some(Value::record([("text", Value::from(format!("{text}!")))]))
            })
            .unwrap();

        let echo_req = client.schema.type_by_name("echo.req").unwrap();
        let mut bytes = client
            .schema
            .encode(
                client.package,
                &Value::record([
                    ("type", Value::from(1i64)),
                    ("session", Value::from(77i64)),
                ]),
            )
            .unwrap();
        bytes.extend(
            client
                .schema
                .encode(echo_req, &Value::record([("text", Value::from("hey"))]))
                .unwrap(),
        );
        deliver_frame(&mut client, &bytes);

        assert!(client.update().ok);

        let sent = client.session.socket_mut().sent_payloads();
        let (header, body) = parse_sent(&client, sent.last().unwrap());
        assert_eq!(header.field("type"), None, "responses carry no type");
        assert_eq!(header.field("session").and_then(Value::as_integer), Some(77));
        let echo_resp = client.schema.type_by_name("echo.resp").unwrap();
        let decoded = client.schema.decode(echo_resp, &body).unwrap().value;
        assert_eq!(decoded.field("text").and_then(Value::as_str), Some("hey!"));
    }

    #[test]
    fn inbound_request_without_handler_or_protocol_dropped() {
        let mut client = established();
        let sends_before = client.session.socket_mut().sent.len();

        // Unknown protocol tag 42.
        let bytes = client
            .schema
            .encode(client.package, &Value::record([("type", Value::from(42i64))]))
            .unwrap();
        deliver_frame(&mut client, &bytes);
        assert!(client.update().ok);

        // Known protocol, no handler registered.
        let echo_req = client.schema.type_by_name("echo.req").unwrap();
        let mut bytes = client
            .schema
            .encode(
                client.package,
                &Value::record([("type", Value::from(1i64)), ("session", Value::from(5i64))]),
            )
            .unwrap();
        bytes.extend(
            client
                .schema
                .encode(echo_req, &Value::record([("text", Value::from("x"))]))
                .unwrap(),
        );
        deliver_frame(&mut client, &bytes);
        assert!(client.update().ok);

        assert_eq!(client.session.socket_mut().sent.len(), sends_before);
    }

    #[test]
    fn register_validation() {
        let mut client = established();
        client.register("echo", |_| None).unwrap();
        assert!(matches!(
            client.register("echo", |_| None),
            Err(ClientError::DuplicateHandler { .. })
        ));
        assert!(matches!(
            client.register("missing", |_| None),
            Err(ClientError::UnknownProtocol { .. })
        ));
    }

    #[test]
    fn close_rejects_pending_calls() {
        let mut client = established();
        let args = Value::record([("text", Value::from("bye"))]);
        let handle = client.call("echo", Some(&args)).unwrap();

        client.close();
        assert_eq!(client.session.state(), SessionState::Closed);
        assert!(matches!(
            handle.poll(),
            Some(Err(ClientError::SessionClosed))
        ));
        assert!(matches!(
            client.call("echo", Some(&args)),
            Err(ClientError::SessionClosed)
        ));
        assert!(matches!(
            client.invoke("note", None),
            Err(ClientError::SessionClosed)
        ));
    }
}
