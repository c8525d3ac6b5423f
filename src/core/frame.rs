//! # BTP Frames
//!
//! Binary encoding of BTP 2.0 frames as carried over the WebSocket transport.
//!
//! ## Wire Format
//! ```text
//! [Type(1)] [RequestId(4)] [Contents(var-octet-string)]
//!
//! MESSAGE / RESPONSE contents: ProtocolData
//! ERROR contents:    [Code(3)] [Name(var)] [TriggeredAt(var)] [Data(var)] ProtocolData
//! TRANSFER contents: [Amount(8)] ProtocolData
//!
//! ProtocolData: [Count(var-uint)] { [Name(var)] [ContentType(1)] [Data(var)] }*
//! ```

use bytes::{BufMut, BytesMut};
use chrono::Utc;

use crate::core::oer::{self, Reader};
use crate::error::{constants, PluginError, Result};

/// Sub-protocol carrying the auth marker (empty payload).
pub const PROTOCOL_AUTH: &str = "auth";
/// Sub-protocol carrying the account username.
pub const PROTOCOL_AUTH_USERNAME: &str = "auth_username";
/// Sub-protocol carrying the account token.
pub const PROTOCOL_AUTH_TOKEN: &str = "auth_token";
/// Sub-protocol carrying a serialized ILP packet.
pub const PROTOCOL_ILP: &str = "ilp";

/// Error name sent when a peer's credentials are refused.
pub const ERROR_NAME_NOT_ACCEPTED: &str = "NotAcceptedError";
/// Error name sent for server-side failures with no better classification.
pub const ERROR_NAME_UNSPECIFIED: &str = "UnspecifiedError";
/// Error code shared by the auth and server failure frames.
pub const ERROR_CODE_NOT_ACCEPTED: &str = "F00";

/// BTP frame type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Response = 1,
    Error = 2,
    Message = 6,
    Transfer = 7,
}

impl TryFrom<u8> for FrameType {
    type Error = PluginError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameType::Response),
            2 => Ok(FrameType::Error),
            6 => Ok(FrameType::Message),
            7 => Ok(FrameType::Transfer),
            other => Err(PluginError::UnknownFrameType(other)),
        }
    }
}

/// Content-type tag of a sub-message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    OctetStream,
    TextPlainUtf8,
    ApplicationJson,
}

impl ContentType {
    pub fn as_u8(self) -> u8 {
        match self {
            ContentType::OctetStream => 0,
            ContentType::TextPlainUtf8 => 1,
            ContentType::ApplicationJson => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ContentType::OctetStream),
            1 => Some(ContentType::TextPlainUtf8),
            2 => Some(ContentType::ApplicationJson),
            _ => None,
        }
    }
}

/// One named sub-message inside a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolData {
    pub protocol_name: String,
    pub content_type: ContentType,
    pub data: Vec<u8>,
}

impl ProtocolData {
    pub fn new(protocol_name: impl Into<String>, content_type: ContentType, data: Vec<u8>) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            content_type,
            data,
        }
    }

    /// Binary sub-message.
    pub fn octets(protocol_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(protocol_name, ContentType::OctetStream, data)
    }

    /// UTF-8 text sub-message.
    pub fn text(protocol_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            protocol_name,
            ContentType::TextPlainUtf8,
            text.into().into_bytes(),
        )
    }
}

/// Payload of an ERROR frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtpError {
    /// Three-character error code, e.g. `F00`.
    pub code: String,
    /// Error kind label, e.g. `NotAcceptedError`.
    pub name: String,
    /// GeneralizedTime at which the error was raised.
    pub triggered_at: String,
    pub data: Vec<u8>,
    pub protocol_data: Vec<ProtocolData>,
}

impl BtpError {
    /// Build an error stamped with the current time.
    pub fn new(code: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            triggered_at: generalized_time_now(),
            data: message.into().into_bytes(),
            protocol_data: Vec::new(),
        }
    }

    /// The error detail interpreted as text.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Frame contents by type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Message(Vec<ProtocolData>),
    Response(Vec<ProtocolData>),
    Error(BtpError),
    Transfer {
        amount: u64,
        protocol_data: Vec<ProtocolData>,
    },
}

/// A single BTP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub request_id: u32,
    pub body: FrameBody,
}

impl Frame {
    pub fn message(request_id: u32, protocol_data: Vec<ProtocolData>) -> Self {
        Self {
            request_id,
            body: FrameBody::Message(protocol_data),
        }
    }

    pub fn response(request_id: u32, protocol_data: Vec<ProtocolData>) -> Self {
        Self {
            request_id,
            body: FrameBody::Response(protocol_data),
        }
    }

    pub fn error(request_id: u32, error: BtpError) -> Self {
        Self {
            request_id,
            body: FrameBody::Error(error),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self.body {
            FrameBody::Message(_) => FrameType::Message,
            FrameBody::Response(_) => FrameType::Response,
            FrameBody::Error(_) => FrameType::Error,
            FrameBody::Transfer { .. } => FrameType::Transfer,
        }
    }

    /// Sub-messages of the frame, whatever its type.
    pub fn protocol_data(&self) -> &[ProtocolData] {
        match &self.body {
            FrameBody::Message(pd) | FrameBody::Response(pd) => pd,
            FrameBody::Error(err) => &err.protocol_data,
            FrameBody::Transfer { protocol_data, .. } => protocol_data,
        }
    }

    /// First sub-message with the given protocol name.
    pub fn find_protocol(&self, name: &str) -> Option<&ProtocolData> {
        self.protocol_data()
            .iter()
            .find(|pd| pd.protocol_name == name)
    }

    /// Serialize the frame to its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut contents = BytesMut::new();
        match &self.body {
            FrameBody::Message(pd) | FrameBody::Response(pd) => {
                write_protocol_data(&mut contents, pd);
            }
            FrameBody::Error(err) => {
                contents.put_slice(&fixed_code(&err.code));
                oer::write_var_octet_string(&mut contents, err.name.as_bytes());
                oer::write_var_octet_string(&mut contents, err.triggered_at.as_bytes());
                oer::write_var_octet_string(&mut contents, &err.data);
                write_protocol_data(&mut contents, &err.protocol_data);
            }
            FrameBody::Transfer {
                amount,
                protocol_data,
            } => {
                contents.put_u64(*amount);
                write_protocol_data(&mut contents, protocol_data);
            }
        }

        let mut buf = BytesMut::with_capacity(contents.len() + 10);
        buf.put_u8(self.frame_type() as u8);
        buf.put_u32(self.request_id);
        oer::write_var_octet_string(&mut buf, &contents);
        buf.to_vec()
    }

    /// Parse a frame from its wire representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let frame_type = FrameType::try_from(reader.read_u8()?)?;
        let request_id = reader.read_u32()?;
        let contents = reader.read_var_octet_string()?;
        reader.finish()?;

        let mut reader = Reader::new(contents);
        let body = match frame_type {
            FrameType::Message => FrameBody::Message(read_protocol_data(&mut reader)?),
            FrameType::Response => FrameBody::Response(read_protocol_data(&mut reader)?),
            FrameType::Error => {
                let code = std::str::from_utf8(reader.read_fixed(3)?)
                    .map_err(|_| {
                        PluginError::DeserializeError(constants::ERR_INVALID_ERROR_CODE.into())
                    })?
                    .to_string();
                let name = reader.read_var_string()?;
                let triggered_at = reader.read_var_string()?;
                let data = reader.read_var_octet_string()?.to_vec();
                let protocol_data = read_protocol_data(&mut reader)?;
                FrameBody::Error(BtpError {
                    code,
                    name,
                    triggered_at,
                    data,
                    protocol_data,
                })
            }
            FrameType::Transfer => {
                let amount = reader.read_u64()?;
                let protocol_data = read_protocol_data(&mut reader)?;
                FrameBody::Transfer {
                    amount,
                    protocol_data,
                }
            }
        };
        reader.finish()?;

        Ok(Self { request_id, body })
    }
}

fn write_protocol_data(buf: &mut BytesMut, entries: &[ProtocolData]) {
    oer::write_var_uint(buf, entries.len() as u64);
    for entry in entries {
        oer::write_var_octet_string(buf, entry.protocol_name.as_bytes());
        buf.put_u8(entry.content_type.as_u8());
        oer::write_var_octet_string(buf, &entry.data);
    }
}

fn read_protocol_data(reader: &mut Reader<'_>) -> Result<Vec<ProtocolData>> {
    let count = reader.read_var_uint()?;
    // Each entry needs at least three bytes; refuse counts the input cannot hold.
    if count > (reader.remaining() / 3) as u64 {
        return Err(PluginError::DeserializeError(
            constants::ERR_UNEXPECTED_EOF.into(),
        ));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let protocol_name = reader.read_var_string()?;
        let raw_type = reader.read_u8()?;
        let content_type = ContentType::from_u8(raw_type).ok_or_else(|| {
            PluginError::DeserializeError(format!("Unknown content type: {raw_type}"))
        })?;
        let data = reader.read_var_octet_string()?.to_vec();
        entries.push(ProtocolData {
            protocol_name,
            content_type,
            data,
        });
    }
    Ok(entries)
}

/// Copy an error code into the three bytes the wire format requires.
///
/// Codes are always three ASCII characters. Anything else is a caller bug:
/// debug builds panic, release builds pad with spaces or truncate.
fn fixed_code(code: &str) -> [u8; 3] {
    debug_assert_eq!(code.len(), 3, "BTP error code must be 3 bytes: {code:?}");
    let mut out = [b' '; 3];
    for (slot, b) in out.iter_mut().zip(code.bytes()) {
        *slot = b;
    }
    out
}

/// Current time as an ASN.1 GeneralizedTime string with millisecond precision.
pub fn generalized_time_now() -> String {
    Utc::now().format("%Y%m%d%H%M%S%.3fZ").to_string()
}
