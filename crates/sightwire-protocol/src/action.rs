//! Actions: one framed request and the reply it receives.
//!
//! An [`Action`] is built by a caller in three steps: positional header
//! fields, then an optional property map, then an optional body. The
//! transport encodes it with a correlation number and, for waited
//! requests, stores the broker's reply back into the same action.
//!
//! ```text
//! request := type:u8 correlation:u32 session:u32 item:u32 count:u8
//!            field{count} map-or-null body-or-null
//! reply   := type:u8 correlation:u32 session:u32 item:u32 count:u8
//!            rc:i32 field{count} map-or-null body-or-null
//! ```
//!
//! Actions are reusable: [`Action::reset`] clears every buffer but keeps
//! the allocations. A reset action must not be handed to a second request
//! while the first one is still waiting for its reply; the `&mut` borrow
//! taken by the transport enforces that.

use std::fmt;

use crate::codec::{FieldReader, FieldWriter, TAG_NULL};
use crate::{PropertyMap, ProtocolError, ReturnCode, Value};

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// Selects how the broker handles an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionType {
    /// Send from a producer, no acknowledgement.
    Message = 1,
    /// Send from a producer and wait for the acknowledgement.
    MessageWait = 2,
    /// Send without a producer, no acknowledgement.
    MessageNoProducer = 3,
    /// Send without a producer and wait for the acknowledgement.
    MessageNoProducerWait = 4,
    /// A reply to an earlier action.
    Reply = 9,
    CreateConnection = 10,
    CloseConnection = 11,
    CreateSession = 12,
    CloseSession = 13,
    CreateProducer = 14,
    CloseProducer = 15,
    CreateConsumer = 16,
    CreateDurable = 17,
    CloseConsumer = 18,
    /// Re-enables delivery on a session after consumer creation.
    ResumeSession = 19,
    UnsubscribeDurable = 20,
    CreateTransaction = 21,
    CommitSession = 22,
    RollbackSession = 23,
}

impl ActionType {
    /// The wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns `true` for the four message-send variants.
    pub fn is_send(self) -> bool {
        matches!(
            self,
            Self::Message
                | Self::MessageWait
                | Self::MessageNoProducer
                | Self::MessageNoProducerWait
        )
    }

    /// Returns `true` for sends the broker does not acknowledge.
    pub fn is_fire_and_forget(self) -> bool {
        matches!(self, Self::Message | Self::MessageNoProducer)
    }
}

impl TryFrom<u8> for ActionType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        let t = match code {
            1 => Self::Message,
            2 => Self::MessageWait,
            3 => Self::MessageNoProducer,
            4 => Self::MessageNoProducerWait,
            9 => Self::Reply,
            10 => Self::CreateConnection,
            11 => Self::CloseConnection,
            12 => Self::CreateSession,
            13 => Self::CloseSession,
            14 => Self::CreateProducer,
            15 => Self::CloseProducer,
            16 => Self::CreateConsumer,
            17 => Self::CreateDurable,
            18 => Self::CloseConsumer,
            19 => Self::ResumeSession,
            20 => Self::UnsubscribeDurable,
            21 => Self::CreateTransaction,
            22 => Self::CommitSession,
            23 => Self::RollbackSession,
            other => return Err(ProtocolError::UnknownActionType(other)),
        };
        Ok(t)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Frame header
// ---------------------------------------------------------------------------

struct Header {
    action_type: ActionType,
    correlation: u32,
    session_id: u32,
    item_id: u32,
    field_count: u8,
}

impl Header {
    fn write(&self, w: &mut FieldWriter) {
        w.put_raw_u8(self.action_type.code());
        w.put_raw_u32(self.correlation);
        w.put_raw_u32(self.session_id);
        w.put_raw_u32(self.item_id);
        w.put_raw_u8(self.field_count);
    }

    fn read(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            action_type: ActionType::try_from(r.read_raw_u8()?)?,
            correlation: r.read_raw_u32()?,
            session_id: r.read_raw_u32()?,
            item_id: r.read_raw_u32()?,
            field_count: r.read_raw_u8()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// An outbound request and, once completed, its reply.
#[derive(Debug, Clone)]
pub struct Action {
    action_type: ActionType,
    session_id: u32,
    item_id: u32,
    header_count: u8,
    field_count: u8,
    fields: FieldWriter,
    properties: Option<FieldWriter>,
    body: Option<Vec<u8>>,
    return_code: ReturnCode,
    response: Vec<Value>,
}

impl Action {
    /// Creates an action for a session. Use [`with_item`](Self::with_item)
    /// to address a producer or consumer inside it.
    pub fn new(action_type: ActionType, session_id: u32) -> Self {
        Self {
            action_type,
            session_id,
            item_id: 0,
            header_count: 0,
            field_count: 0,
            fields: FieldWriter::with_capacity(64),
            properties: None,
            body: None,
            return_code: ReturnCode::OK,
            response: Vec::new(),
        }
    }

    /// Sets the producer or consumer this action refers to.
    pub fn with_item(mut self, item_id: u32) -> Self {
        self.item_id = item_id;
        self
    }

    /// Clears the action for reuse, keeping its buffers.
    pub fn reset(&mut self, action_type: ActionType, item_id: u32) {
        self.action_type = action_type;
        self.item_id = item_id;
        self.header_count = 0;
        self.field_count = 0;
        self.fields.clear();
        self.properties = None;
        self.body = None;
        self.return_code = ReturnCode::OK;
        self.response.clear();
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn item_id(&self) -> u32 {
        self.item_id
    }

    /// Declares how many positional fields precede the property map.
    ///
    /// May be called before or after the fields are written; the count is
    /// checked against the fields actually written when the action is
    /// encoded.
    pub fn set_header_count(&mut self, count: u8) {
        self.header_count = count;
    }

    fn bump(&mut self) -> Result<(), ProtocolError> {
        self.field_count = self.field_count.checked_add(1).ok_or_else(|| {
            ProtocolError::InvalidMessage("more than 255 header fields".into())
        })?;
        Ok(())
    }

    pub fn put_bool(&mut self, value: bool) -> Result<(), ProtocolError> {
        self.bump()?;
        self.fields.put_bool(value);
        Ok(())
    }

    pub fn put_byte(&mut self, value: i8) -> Result<(), ProtocolError> {
        self.bump()?;
        self.fields.put_byte(value);
        Ok(())
    }

    pub fn put_int(&mut self, value: i32) -> Result<(), ProtocolError> {
        self.bump()?;
        self.fields.put_int(value);
        Ok(())
    }

    pub fn put_long(&mut self, value: i64) -> Result<(), ProtocolError> {
        self.bump()?;
        self.fields.put_long(value);
        Ok(())
    }

    /// Writes a string field; `None` is the null marker.
    pub fn put_str(&mut self, value: Option<&str>) -> Result<(), ProtocolError> {
        // Encode first so a failure does not count a field.
        self.fields.put_str(value)?;
        self.bump()
    }

    /// Writes a string field given as UTF-16 code units.
    pub fn put_utf16(&mut self, units: &[u16]) -> Result<(), ProtocolError> {
        self.fields.put_utf16(units)?;
        self.bump()
    }

    /// Writes any value as a header field.
    pub fn put_value(&mut self, value: &Value) -> Result<(), ProtocolError> {
        self.fields.put_value(value)?;
        self.bump()
    }

    /// Attaches the property map. Replaces any map set earlier.
    pub fn put_properties(&mut self, map: &PropertyMap) -> Result<(), ProtocolError> {
        let mut w = FieldWriter::with_capacity(map.len() * 24);
        w.put_map(Some(map))?;
        self.properties = Some(w);
        Ok(())
    }

    /// Attaches the binary body.
    pub fn set_body(&mut self, body: Option<Vec<u8>>) {
        self.body = body;
    }

    /// Encodes the action into a request frame.
    ///
    /// # Errors
    /// [`ProtocolError::HeaderCountMismatch`] if the declared header count
    /// differs from the number of fields written.
    pub fn encode(&self, correlation: u32) -> Result<Vec<u8>, ProtocolError> {
        if self.header_count != self.field_count {
            return Err(ProtocolError::HeaderCountMismatch {
                declared: self.header_count,
                written: self.field_count,
            });
        }
        let props_len = self.properties.as_ref().map_or(1, FieldWriter::len);
        let body_len = self.body.as_ref().map_or(1, |b| b.len() + 5);
        let mut w = FieldWriter::with_capacity(14 + self.fields.len() + props_len + body_len);
        Header {
            action_type: self.action_type,
            correlation,
            session_id: self.session_id,
            item_id: self.item_id,
            field_count: self.field_count,
        }
        .write(&mut w);
        w.put_raw_bytes(self.fields.as_bytes());
        match &self.properties {
            Some(props) => w.put_raw_bytes(props.as_bytes()),
            None => w.put_raw_u8(TAG_NULL),
        }
        match &self.body {
            Some(body) => w.put_bytes(Some(body))?,
            None => w.put_raw_u8(TAG_NULL),
        }
        Ok(w.into_inner())
    }

    /// Stores the broker's reply.
    pub fn complete(&mut self, reply: Frame) {
        self.return_code = reply.return_code.unwrap_or(ReturnCode::OK);
        self.response = reply.fields;
    }

    /// The return code from the last waited request.
    ///
    /// Not meaningful after a fire-and-forget request.
    pub fn return_code(&self) -> ReturnCode {
        self.return_code
    }

    /// The positional fields of the reply.
    pub fn response(&self) -> &[Value] {
        &self.response
    }

    /// Reads reply field `index` as an `i32`.
    pub fn response_int(&self, index: usize) -> Option<i32> {
        self.response.get(index).and_then(Value::as_int)
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A fully decoded frame, request or reply.
///
/// The client decodes replies with it; test brokers decode requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub action_type: ActionType,
    pub correlation: u32,
    pub session_id: u32,
    pub item_id: u32,
    /// Present exactly when `action_type` is [`ActionType::Reply`].
    pub return_code: Option<ReturnCode>,
    pub fields: Vec<Value>,
    pub properties: Option<PropertyMap>,
    pub body: Option<Vec<u8>>,
}

impl Frame {
    /// Builds a reply to `request`.
    pub fn reply(request: &Frame, rc: ReturnCode, fields: Vec<Value>) -> Self {
        Self {
            action_type: ActionType::Reply,
            correlation: request.correlation,
            session_id: request.session_id,
            item_id: request.item_id,
            return_code: Some(rc),
            fields,
            properties: None,
            body: None,
        }
    }

    /// Parses a complete frame.
    ///
    /// # Errors
    /// Any truncation, unknown tag, or trailing garbage is reported as a
    /// [`ProtocolError`].
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FieldReader::new(data);
        let header = Header::read(&mut r)?;
        let return_code = if header.action_type == ActionType::Reply {
            Some(ReturnCode(r.read_raw_i32()?))
        } else {
            None
        };
        let mut fields = Vec::with_capacity(usize::from(header.field_count));
        for _ in 0..header.field_count {
            fields.push(r.read_value()?);
        }
        let properties = r.read_optional_map()?;
        let body = r.read_optional_bytes()?;
        if !r.is_empty() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} trailing bytes after frame",
                r.remaining()
            )));
        }
        Ok(Self {
            action_type: header.action_type,
            correlation: header.correlation,
            session_id: header.session_id,
            item_id: header.item_id,
            return_code,
            fields,
            properties,
            body,
        })
    }

    /// Encodes the frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let field_count = u8::try_from(self.fields.len())
            .map_err(|_| ProtocolError::TooLong(self.fields.len()))?;
        let mut w = FieldWriter::with_capacity(64);
        Header {
            action_type: self.action_type,
            correlation: self.correlation,
            session_id: self.session_id,
            item_id: self.item_id,
            field_count,
        }
        .write(&mut w);
        if self.action_type == ActionType::Reply {
            w.put_raw_i32(self.return_code.unwrap_or(ReturnCode::OK).code());
        }
        for field in &self.fields {
            w.put_value(field)?;
        }
        w.put_map(self.properties.as_ref())?;
        match &self.body {
            Some(body) => w.put_bytes(Some(body))?,
            None => w.put_null(),
        }
        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer_action() -> Action {
        let mut action = Action::new(ActionType::CreateConsumer, 7).with_item(3);
        action.put_byte(2).unwrap();
        action.put_bool(false).unwrap();
        action.put_str(None).unwrap();
        action.set_header_count(3);
        action
    }

    // =====================================================================
    // Encoding
    // =====================================================================

    #[test]
    fn test_encode_header_count_mismatch_fails() {
        let mut action = Action::new(ActionType::CreateConsumer, 1);
        action.put_byte(1).unwrap();
        action.set_header_count(2);

        let err = action.encode(1).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::HeaderCountMismatch { declared: 2, written: 1 }
        ));
    }

    #[test]
    fn test_set_header_count_after_fields_is_accepted() {
        let action = consumer_action();
        assert!(action.encode(10).is_ok());
    }

    #[test]
    fn test_encode_decode_request_frame() {
        let mut action = consumer_action();
        let mut props = PropertyMap::new();
        props.insert("Durable", false);
        action.put_properties(&props).unwrap();
        action.set_body(Some(vec![9, 8, 7]));

        let frame = Frame::decode(&action.encode(42).unwrap()).unwrap();

        assert_eq!(frame.action_type, ActionType::CreateConsumer);
        assert_eq!(frame.correlation, 42);
        assert_eq!(frame.session_id, 7);
        assert_eq!(frame.item_id, 3);
        assert_eq!(frame.return_code, None);
        assert_eq!(
            frame.fields,
            vec![Value::Byte(2), Value::Bool(false), Value::Null]
        );
        assert_eq!(frame.properties, Some(props));
        assert_eq!(frame.body, Some(vec![9, 8, 7]));
    }

    #[test]
    fn test_encode_without_map_or_body_writes_null_tags() {
        let action = Action::new(ActionType::ResumeSession, 5);
        let bytes = action.encode(1).unwrap();

        assert_eq!(bytes.len(), 14 + 2);
        assert_eq!(&bytes[14..], &[TAG_NULL, TAG_NULL]);
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.properties, None);
        assert_eq!(frame.body, None);
    }

    #[test]
    fn test_put_str_failure_does_not_count_field() {
        let mut action = Action::new(ActionType::CreateDurable, 1);
        assert!(action.put_utf16(&[0xDC00]).is_err());
        action.set_header_count(0);
        assert!(action.encode(1).is_ok());
    }

    // =====================================================================
    // Replies and reuse
    // =====================================================================

    #[test]
    fn test_complete_stores_reply() {
        let request = Frame::decode(&consumer_action().encode(5).unwrap()).unwrap();
        let reply_bytes = Frame::reply(
            &request,
            ReturnCode::DESTINATION_IN_USE,
            vec![Value::Int(77)],
        )
        .encode()
        .unwrap();
        let reply = Frame::decode(&reply_bytes).unwrap();

        let mut action = consumer_action();
        action.complete(reply);

        assert_eq!(action.return_code(), ReturnCode::DESTINATION_IN_USE);
        assert_eq!(action.response_int(0), Some(77));
    }

    #[test]
    fn test_complete_reply_without_fields_has_no_response_int() {
        let request = Frame::decode(&consumer_action().encode(5).unwrap()).unwrap();
        let reply_bytes = Frame::reply(&request, ReturnCode::OK, Vec::new()).encode().unwrap();

        let mut action = consumer_action();
        action.complete(Frame::decode(&reply_bytes).unwrap());

        assert!(action.return_code().is_ok());
        assert_eq!(action.response_int(0), None);
    }

    #[test]
    fn test_reset_clears_fields_and_reply() {
        let mut action = consumer_action();
        action.complete(Frame {
            action_type: ActionType::Reply,
            correlation: 1,
            session_id: 7,
            item_id: 3,
            return_code: Some(ReturnCode::ERROR),
            fields: vec![Value::Int(1)],
            properties: None,
            body: None,
        });

        action.reset(ActionType::MessageWait, 9);

        assert_eq!(action.action_type(), ActionType::MessageWait);
        assert_eq!(action.item_id(), 9);
        assert_eq!(action.return_code(), ReturnCode::OK);
        assert!(action.response().is_empty());
        let frame = Frame::decode(&action.encode(2).unwrap()).unwrap();
        assert!(frame.fields.is_empty());
    }

    // =====================================================================
    // Decoding errors
    // =====================================================================

    #[test]
    fn test_decode_truncated_frame_fails() {
        let bytes = consumer_action().encode(1).unwrap();
        for cut in 0..bytes.len() {
            assert!(Frame::decode(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_decode_trailing_bytes_fails() {
        let mut bytes = consumer_action().encode(1).unwrap();
        bytes.push(0);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_decode_unknown_action_type_fails() {
        let mut bytes = consumer_action().encode(1).unwrap();
        bytes[0] = 200;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::UnknownActionType(200))
        ));
    }

    #[test]
    fn test_action_type_try_from_round_trips() {
        for code in 0..=255u8 {
            if let Ok(t) = ActionType::try_from(code) {
                assert_eq!(t.code(), code);
            }
        }
    }

    #[test]
    fn test_is_fire_and_forget() {
        assert!(ActionType::Message.is_fire_and_forget());
        assert!(ActionType::MessageNoProducer.is_fire_and_forget());
        assert!(!ActionType::MessageWait.is_fire_and_forget());
        assert!(ActionType::MessageNoProducerWait.is_send());
    }
}
