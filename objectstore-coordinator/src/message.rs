//! Wire messages exchanged between coordinators.
//!
//! Every message is a fixed 77 byte header followed by a typed payload:
//!
//! | field      | type     | meaning                                   |
//! |------------|----------|-------------------------------------------|
//! | magic      | u8       | [`MESSAGE_MAGIC`]                         |
//! | version    | u8       | [`MESSAGE_VERSION`]                       |
//! | type       | u8       | [`MessageType`]                           |
//! | flags      | u8       | [`MessageFlag`] bits                      |
//! | id         | u16      | sender-assigned id                        |
//! | request_id | u16      | id of the request answered, 0 if none     |
//! | data_size  | u32      | total encoded size including the header   |
//! | device_id  | [u8; 65] | sender device id, NUL padded              |
//!
//! `Message::data_size()` always equals the length `Message::encode()`
//! produces; encoding checks this before returning.

use crate::codec::{prefixed_len, ByteReader, ByteWriter, CodecError};
use objectstore_types::{DeviceId, ObjectKey, MAX_DEVICE_ID_LEN};

/// First byte of every message.
pub const MESSAGE_MAGIC: u8 = 0xF6;

/// Protocol version written by this build.
pub const MESSAGE_VERSION: u8 = 1;

/// Size of the NUL-padded device id field.
pub const DEVICE_ID_FIELD_LEN: usize = MAX_DEVICE_ID_LEN + 1;

/// Encoded header size.
pub const HEADER_LEN: usize = 1 + 1 + 1 + 1 + 2 + 2 + 4 + DEVICE_ID_FIELD_LEN;

/// Longest key accepted in observe requests.
pub const MAX_OBSERVE_KEY_LEN: usize = 256;

/// Longest encoded operation carried by a message.
pub const MAX_OPERATION_LEN: usize = 256 * 1024;

/// Longest network id carried by a handshake.
pub const MAX_NETWORK_ID_LEN: usize = 256;

/// Largest message accepted in one send or receive.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024 + 1024;

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    ObserveRequest = 1,
    ObserveResponse = 2,
    RemoveObserverRequest = 3,
    PutRequest = 4,
    PutResponse = 5,
    GetRequest = 6,
    GetResponse = 7,
    PublishRequest = 8,
    DeleteRequest = 9,
    DeleteResponse = 10,
    PublishDeleteRequest = 11,
    HandshakeRequest = 12,
    HandshakeResponse = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            1 => Self::ObserveRequest,
            2 => Self::ObserveResponse,
            3 => Self::RemoveObserverRequest,
            4 => Self::PutRequest,
            5 => Self::PutResponse,
            6 => Self::GetRequest,
            7 => Self::GetResponse,
            8 => Self::PublishRequest,
            9 => Self::DeleteRequest,
            10 => Self::DeleteResponse,
            11 => Self::PublishDeleteRequest,
            12 => Self::HandshakeRequest,
            13 => Self::HandshakeResponse,
            other => return Err(CodecError::UnknownMessageType(other)),
        })
    }
}

impl MessageType {
    /// Whether a sender waits for an answer to this type.
    pub fn expects_response(self) -> bool {
        matches!(
            self,
            Self::ObserveRequest
                | Self::PutRequest
                | Self::GetRequest
                | Self::DeleteRequest
                | Self::HandshakeRequest
        )
    }

    /// Whether this type answers a request.
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::ObserveResponse
                | Self::PutResponse
                | Self::GetResponse
                | Self::DeleteResponse
                | Self::HandshakeResponse
        )
    }
}

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageFlag {
    Encrypted = 0x1,
}

/// Identity exchanged when two devices first talk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub device_id: DeviceId,
    pub network_id: String,
}

/// Typed message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    HandshakeRequest(Handshake),
    HandshakeResponse(Handshake),
    ObserveRequest { key: ObjectKey, mode: u32 },
    /// `operation` is the encoded current value as a put operation.
    ObserveResponse { status: u32, operation: Vec<u8> },
    RemoveObserverRequest { key: ObjectKey },
    PutRequest { operation: Vec<u8> },
    PutResponse { status: u32 },
    GetRequest { operation: Vec<u8> },
    /// `operation` is the encoded value as a put operation, empty on failure.
    GetResponse { status: u32, operation: Vec<u8> },
    DeleteRequest { operation: Vec<u8> },
    DeleteResponse { status: u32 },
    PublishRequest { operation: Vec<u8> },
    PublishDeleteRequest { operation: Vec<u8> },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::HandshakeRequest(_) => MessageType::HandshakeRequest,
            Self::HandshakeResponse(_) => MessageType::HandshakeResponse,
            Self::ObserveRequest { .. } => MessageType::ObserveRequest,
            Self::ObserveResponse { .. } => MessageType::ObserveResponse,
            Self::RemoveObserverRequest { .. } => MessageType::RemoveObserverRequest,
            Self::PutRequest { .. } => MessageType::PutRequest,
            Self::PutResponse { .. } => MessageType::PutResponse,
            Self::GetRequest { .. } => MessageType::GetRequest,
            Self::GetResponse { .. } => MessageType::GetResponse,
            Self::DeleteRequest { .. } => MessageType::DeleteRequest,
            Self::DeleteResponse { .. } => MessageType::DeleteResponse,
            Self::PublishRequest { .. } => MessageType::PublishRequest,
            Self::PublishDeleteRequest { .. } => MessageType::PublishDeleteRequest,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::HandshakeRequest(h) | Self::HandshakeResponse(h) => {
                prefixed_len(h.device_id.as_bytes().len()) + prefixed_len(h.network_id.len())
            }
            Self::ObserveRequest { key, .. } => prefixed_len(key.len()) + 4,
            Self::RemoveObserverRequest { key } => prefixed_len(key.len()),
            Self::ObserveResponse { operation, .. } | Self::GetResponse { operation, .. } => {
                4 + prefixed_len(operation.len())
            }
            Self::PutRequest { operation }
            | Self::GetRequest { operation }
            | Self::DeleteRequest { operation }
            | Self::PublishRequest { operation }
            | Self::PublishDeleteRequest { operation } => prefixed_len(operation.len()),
            Self::PutResponse { .. } | Self::DeleteResponse { .. } => 4,
        }
    }

    fn encode(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        match self {
            Self::HandshakeRequest(h) | Self::HandshakeResponse(h) => {
                w.write_bytes("device id", h.device_id.as_bytes(), MAX_DEVICE_ID_LEN)?;
                w.write_bytes("network id", h.network_id.as_bytes(), MAX_NETWORK_ID_LEN)
            }
            Self::ObserveRequest { key, mode } => {
                w.write_bytes("observe key", key.as_bytes(), MAX_OBSERVE_KEY_LEN)?;
                w.write_u32(*mode)
            }
            Self::RemoveObserverRequest { key } => {
                w.write_bytes("observe key", key.as_bytes(), MAX_OBSERVE_KEY_LEN)
            }
            Self::ObserveResponse { status, operation }
            | Self::GetResponse { status, operation } => {
                w.write_u32(*status)?;
                w.write_bytes("operation", operation, MAX_OPERATION_LEN)
            }
            Self::PutRequest { operation }
            | Self::GetRequest { operation }
            | Self::DeleteRequest { operation }
            | Self::PublishRequest { operation }
            | Self::PublishDeleteRequest { operation } => {
                w.write_bytes("operation", operation, MAX_OPERATION_LEN)
            }
            Self::PutResponse { status } | Self::DeleteResponse { status } => w.write_u32(*status),
        }
    }

    fn decode(message_type: MessageType, r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(match message_type {
            MessageType::HandshakeRequest => Self::HandshakeRequest(decode_handshake(r)?),
            MessageType::HandshakeResponse => Self::HandshakeResponse(decode_handshake(r)?),
            MessageType::ObserveRequest => Self::ObserveRequest {
                key: ObjectKey::new(r.read_bytes("observe key", MAX_OBSERVE_KEY_LEN)?),
                mode: r.read_u32()?,
            },
            MessageType::ObserveResponse => Self::ObserveResponse {
                status: r.read_u32()?,
                operation: read_operation(r)?,
            },
            MessageType::RemoveObserverRequest => Self::RemoveObserverRequest {
                key: ObjectKey::new(r.read_bytes("observe key", MAX_OBSERVE_KEY_LEN)?),
            },
            MessageType::PutRequest => Self::PutRequest {
                operation: read_operation(r)?,
            },
            MessageType::PutResponse => Self::PutResponse {
                status: r.read_u32()?,
            },
            MessageType::GetRequest => Self::GetRequest {
                operation: read_operation(r)?,
            },
            MessageType::GetResponse => Self::GetResponse {
                status: r.read_u32()?,
                operation: read_operation(r)?,
            },
            MessageType::DeleteRequest => Self::DeleteRequest {
                operation: read_operation(r)?,
            },
            MessageType::DeleteResponse => Self::DeleteResponse {
                status: r.read_u32()?,
            },
            MessageType::PublishRequest => Self::PublishRequest {
                operation: read_operation(r)?,
            },
            MessageType::PublishDeleteRequest => Self::PublishDeleteRequest {
                operation: read_operation(r)?,
            },
        })
    }
}

fn read_operation(r: &mut ByteReader<'_>) -> Result<Vec<u8>, CodecError> {
    r.read_bytes("operation", MAX_OPERATION_LEN)
}

fn decode_handshake(r: &mut ByteReader<'_>) -> Result<Handshake, CodecError> {
    let device = r.read_string("device id", MAX_DEVICE_ID_LEN)?;
    let device_id = DeviceId::new(device).map_err(|_| CodecError::InvalidField("device id"))?;
    let network_id = r.read_string("network id", MAX_NETWORK_ID_LEN)?;
    Ok(Handshake {
        device_id,
        network_id,
    })
}

/// Fixed message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u8,
    pub version: u8,
    pub message_type: MessageType,
    pub flags: u8,
    pub id: u16,
    pub request_id: u16,
    pub data_size: u32,
    /// Sender, stamped by the communicator just before sending.
    pub source: Option<DeviceId>,
}

impl MessageHeader {
    fn encode(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u8(self.magic)?;
        w.write_u8(self.version)?;
        w.write_u8(self.message_type as u8)?;
        w.write_u8(self.flags)?;
        w.write_u16(self.id)?;
        w.write_u16(self.request_id)?;
        w.write_u32(self.data_size)?;
        let mut device = [0u8; DEVICE_ID_FIELD_LEN];
        if let Some(source) = &self.source {
            let bytes = source.as_bytes();
            device[..bytes.len()].copy_from_slice(bytes);
        }
        w.write_raw(&device)
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let magic = r.read_u8()?;
        if magic != MESSAGE_MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let version = r.read_u8()?;
        let message_type = MessageType::try_from(r.read_u8()?)?;
        let flags = r.read_u8()?;
        let id = r.read_u16()?;
        let request_id = r.read_u16()?;
        let data_size = r.read_u32()?;
        let device = r.read_exact(DEVICE_ID_FIELD_LEN)?;
        let end = device.iter().position(|b| *b == 0).unwrap_or(device.len());
        let source = match &device[..end] {
            [] => None,
            bytes => {
                let id = std::str::from_utf8(bytes)
                    .map_err(|_| CodecError::InvalidField("source"))?;
                Some(DeviceId::new(id).map_err(|_| CodecError::InvalidField("source"))?)
            }
        };
        Ok(Self {
            magic,
            version,
            message_type,
            flags,
            id,
            request_id,
            data_size,
            source,
        })
    }
}

/// A header plus its typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Payload,
}

impl Message {
    /// Creates a message with id 0 and no source.
    pub fn new(payload: Payload) -> Self {
        let data_size = (HEADER_LEN + payload.encoded_len()) as u32;
        Self {
            header: MessageHeader {
                magic: MESSAGE_MAGIC,
                version: MESSAGE_VERSION,
                message_type: payload.message_type(),
                flags: 0,
                id: 0,
                request_id: 0,
                data_size,
                source: None,
            },
            payload,
        }
    }

    /// Creates a response correlated with `request`.
    pub fn reply_to(request: &Message, payload: Payload) -> Self {
        let mut message = Self::new(payload);
        message.header.request_id = request.id();
        message
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.header.id = id;
        self
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }

    pub fn request_id(&self) -> u16 {
        self.header.request_id
    }

    pub fn source(&self) -> Option<&DeviceId> {
        self.header.source.as_ref()
    }

    pub fn set_source(&mut self, device: DeviceId) {
        self.header.source = Some(device);
    }

    pub fn set_flag(&mut self, flag: MessageFlag) {
        self.header.flags |= flag as u8;
    }

    pub fn reset_flag(&mut self, flag: MessageFlag) {
        self.header.flags &= !(flag as u8);
    }

    pub fn has_flag(&self, flag: MessageFlag) -> bool {
        self.header.flags & flag as u8 != 0
    }

    pub fn is_valid(&self) -> bool {
        self.header.magic == MESSAGE_MAGIC
    }

    pub fn expects_response(&self) -> bool {
        self.header.message_type.expects_response()
    }

    /// Number of bytes `encode` produces.
    pub fn data_size(&self) -> usize {
        HEADER_LEN + self.payload.encoded_len()
    }

    /// Serializes the message.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let size = self.data_size();
        if size > MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLong {
                field: "message",
                len: size,
                limit: MAX_MESSAGE_SIZE,
            });
        }
        let mut header = self.header.clone();
        header.data_size = size as u32;

        let mut w = ByteWriter::with_limit(size);
        header.encode(&mut w)?;
        self.payload.encode(&mut w)?;
        if w.len() != size {
            return Err(CodecError::SizeMismatch {
                declared: size,
                actual: w.len(),
            });
        }
        Ok(w.into_inner())
    }

    /// Parses one complete message.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLong {
                field: "message",
                len: bytes.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }
        let mut r = ByteReader::new(bytes);
        let header = MessageHeader::decode(&mut r)?;
        if header.data_size as usize != bytes.len() {
            return Err(CodecError::SizeMismatch {
                declared: header.data_size as usize,
                actual: bytes.len(),
            });
        }
        let payload = Payload::decode(header.message_type, &mut r)?;
        r.finish()?;
        Ok(Self { header, payload })
    }
}
