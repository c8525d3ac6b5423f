//! # ILP Packets
//!
//! ILPv4 prepare / fulfill / reject packets carried in the `ilp` sub-protocol.
//!
//! ## Wire Format
//! ```text
//! [Type(1)] [Contents(var-octet-string)]
//!
//! Prepare (12): [Amount(8)] [ExpiresAt(17)] [Condition(32)] [Destination(var)] [Data(var)]
//! Fulfill (13): [Fulfillment(32)] [Data(var)]
//! Reject  (14): [Code(3)] [TriggeredBy(var)] [Message(var)] [Data(var)]
//! ```
//!
//! `ExpiresAt` is a fixed `YYYYMMDDHHmmssfff` UTC timestamp.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

use crate::core::oer::{self, Reader};
use crate::error::{constants, PluginError, Result};

const TYPE_PREPARE: u8 = 12;
const TYPE_FULFILL: u8 = 13;
const TYPE_REJECT: u8 = 14;

const EXPIRY_FORMAT: &str = "%Y%m%d%H%M%S%3f";
const EXPIRY_LEN: usize = 17;

/// ILP error codes.
///
/// `F` codes are final, `T` codes temporary and `R` codes relative errors.
/// Codes received from peers that are not in the standard set are kept in
/// [`ErrorCode::Other`] so they can be forwarded unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    F00BadRequest,
    F01InvalidPacket,
    F02Unreachable,
    F03InvalidAmount,
    F04InsufficientDestinationAmount,
    F05WrongCondition,
    F06UnexpectedPayment,
    F07CannotReceive,
    F08AmountTooLarge,
    F99ApplicationError,
    T00InternalError,
    T01PeerUnreachable,
    T02PeerBusy,
    T03ConnectorBusy,
    T04InsufficientLiquidity,
    T05RateLimited,
    T99ApplicationError,
    R00TransferTimedOut,
    R01InsufficientSourceAmount,
    R02InsufficientTimeout,
    R99ApplicationError,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::F00BadRequest => "F00",
            ErrorCode::F01InvalidPacket => "F01",
            ErrorCode::F02Unreachable => "F02",
            ErrorCode::F03InvalidAmount => "F03",
            ErrorCode::F04InsufficientDestinationAmount => "F04",
            ErrorCode::F05WrongCondition => "F05",
            ErrorCode::F06UnexpectedPayment => "F06",
            ErrorCode::F07CannotReceive => "F07",
            ErrorCode::F08AmountTooLarge => "F08",
            ErrorCode::F99ApplicationError => "F99",
            ErrorCode::T00InternalError => "T00",
            ErrorCode::T01PeerUnreachable => "T01",
            ErrorCode::T02PeerBusy => "T02",
            ErrorCode::T03ConnectorBusy => "T03",
            ErrorCode::T04InsufficientLiquidity => "T04",
            ErrorCode::T05RateLimited => "T05",
            ErrorCode::T99ApplicationError => "T99",
            ErrorCode::R00TransferTimedOut => "R00",
            ErrorCode::R01InsufficientSourceAmount => "R01",
            ErrorCode::R02InsufficientTimeout => "R02",
            ErrorCode::R99ApplicationError => "R99",
            ErrorCode::Other(code) => code,
        }
    }

    /// Whether the code encodes to the three bytes the wire format requires.
    pub fn is_well_formed(&self) -> bool {
        match self {
            ErrorCode::Other(code) => is_error_code_shape(code),
            _ => true,
        }
    }
}

impl FromStr for ErrorCode {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        let code = match s {
            "F00" => ErrorCode::F00BadRequest,
            "F01" => ErrorCode::F01InvalidPacket,
            "F02" => ErrorCode::F02Unreachable,
            "F03" => ErrorCode::F03InvalidAmount,
            "F04" => ErrorCode::F04InsufficientDestinationAmount,
            "F05" => ErrorCode::F05WrongCondition,
            "F06" => ErrorCode::F06UnexpectedPayment,
            "F07" => ErrorCode::F07CannotReceive,
            "F08" => ErrorCode::F08AmountTooLarge,
            "F99" => ErrorCode::F99ApplicationError,
            "T00" => ErrorCode::T00InternalError,
            "T01" => ErrorCode::T01PeerUnreachable,
            "T02" => ErrorCode::T02PeerBusy,
            "T03" => ErrorCode::T03ConnectorBusy,
            "T04" => ErrorCode::T04InsufficientLiquidity,
            "T05" => ErrorCode::T05RateLimited,
            "T99" => ErrorCode::T99ApplicationError,
            "R00" => ErrorCode::R00TransferTimedOut,
            "R01" => ErrorCode::R01InsufficientSourceAmount,
            "R02" => ErrorCode::R02InsufficientTimeout,
            "R99" => ErrorCode::R99ApplicationError,
            other if is_error_code_shape(other) => ErrorCode::Other(other.to_string()),
            _ => {
                return Err(PluginError::DeserializeError(
                    constants::ERR_INVALID_ERROR_CODE.into(),
                ))
            }
        };
        Ok(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class letter (`F`, `T`, `R`) followed by two alphanumerics.
fn is_error_code_shape(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 3
        && matches!(bytes[0], b'F' | b'T' | b'R')
        && bytes[1..].iter().all(u8::is_ascii_alphanumeric)
}

/// Check an ILP address: an allocation scheme followed by one or more segments.
pub fn is_valid_address(address: &str) -> bool {
    const SCHEMES: [&str; 10] = [
        "g", "private", "example", "peer", "self", "test", "test1", "test2", "test3", "local",
    ];

    if address.len() > 1023 {
        return false;
    }
    let mut parts = address.split('.');
    let scheme_ok = parts
        .next()
        .map(|scheme| SCHEMES.contains(&scheme))
        .unwrap_or(false);
    let mut segments = 0;
    for segment in parts {
        if !is_valid_segment(segment) {
            return false;
        }
        segments += 1;
    }
    scheme_ok && segments > 0
}

/// Check a single address segment (`[A-Za-z0-9_~-]+`).
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'~' | b'-'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
    pub amount: u64,
    pub expires_at: DateTime<Utc>,
    pub execution_condition: [u8; 32],
    pub destination: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfill {
    pub fulfillment: [u8; 32],
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    pub code: ErrorCode,
    pub triggered_by: String,
    pub message: String,
    pub data: Vec<u8>,
}

/// Any ILP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Prepare(Prepare),
    Fulfill(Fulfill),
    Reject(Reject),
}

impl From<Prepare> for Packet {
    fn from(p: Prepare) -> Self {
        Packet::Prepare(p)
    }
}

impl From<Fulfill> for Packet {
    fn from(f: Fulfill) -> Self {
        Packet::Fulfill(f)
    }
}

impl From<Reject> for Packet {
    fn from(r: Reject) -> Self {
        Packet::Reject(r)
    }
}

impl Packet {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut contents = BytesMut::new();
        let packet_type = match self {
            Packet::Prepare(p) => {
                contents.put_u64(p.amount);
                contents.put_slice(format_expiry(&p.expires_at).as_bytes());
                contents.put_slice(&p.execution_condition);
                oer::write_var_octet_string(&mut contents, p.destination.as_bytes());
                oer::write_var_octet_string(&mut contents, &p.data);
                TYPE_PREPARE
            }
            Packet::Fulfill(f) => {
                contents.put_slice(&f.fulfillment);
                oer::write_var_octet_string(&mut contents, &f.data);
                TYPE_FULFILL
            }
            Packet::Reject(r) => {
                contents.put_slice(r.code.as_str().as_bytes());
                oer::write_var_octet_string(&mut contents, r.triggered_by.as_bytes());
                oer::write_var_octet_string(&mut contents, r.message.as_bytes());
                oer::write_var_octet_string(&mut contents, &r.data);
                TYPE_REJECT
            }
        };

        let mut buf = BytesMut::with_capacity(contents.len() + 4);
        buf.put_u8(packet_type);
        oer::write_var_octet_string(&mut buf, &contents);
        buf.to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let packet_type = reader.read_u8()?;
        let contents = reader.read_var_octet_string()?;
        reader.finish()?;

        let mut reader = Reader::new(contents);
        let packet = match packet_type {
            TYPE_PREPARE => {
                let amount = reader.read_u64()?;
                let expires_at = parse_expiry(reader.read_fixed(EXPIRY_LEN)?)?;
                let execution_condition = read_32(&mut reader)?;
                let destination = reader.read_var_string()?;
                if !is_valid_address(&destination) {
                    return Err(PluginError::DeserializeError(
                        constants::ERR_INVALID_ADDRESS.into(),
                    ));
                }
                let data = reader.read_var_octet_string()?.to_vec();
                Packet::Prepare(Prepare {
                    amount,
                    expires_at,
                    execution_condition,
                    destination,
                    data,
                })
            }
            TYPE_FULFILL => {
                let fulfillment = read_32(&mut reader)?;
                let data = reader.read_var_octet_string()?.to_vec();
                Packet::Fulfill(Fulfill { fulfillment, data })
            }
            TYPE_REJECT => {
                let code = std::str::from_utf8(reader.read_fixed(3)?)
                    .map_err(|_| {
                        PluginError::DeserializeError(constants::ERR_INVALID_ERROR_CODE.into())
                    })?
                    .parse::<ErrorCode>()?;
                let triggered_by = reader.read_var_string()?;
                let message = reader.read_var_string()?;
                let data = reader.read_var_octet_string()?.to_vec();
                Packet::Reject(Reject {
                    code,
                    triggered_by,
                    message,
                    data,
                })
            }
            other => return Err(PluginError::UnknownPacketType(other)),
        };
        reader.finish()?;
        Ok(packet)
    }
}

fn read_32(reader: &mut Reader<'_>) -> Result<[u8; 32]> {
    let mut out = [0u8; 32];
    out.copy_from_slice(reader.read_fixed(32)?);
    Ok(out)
}

/// Expiry in its fixed 17-digit form. Instants outside years 1 to 9999 have
/// no such form and are clamped to the nearest one that does.
fn format_expiry(at: &DateTime<Utc>) -> String {
    let earliest = NaiveDate::from_ymd_opt(1, 1, 1).and_then(|d| d.and_hms_milli_opt(0, 0, 0, 0));
    let latest =
        NaiveDate::from_ymd_opt(9999, 12, 31).and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999));
    let naive = match (earliest, latest) {
        (Some(lo), Some(hi)) => at.naive_utc().clamp(lo, hi),
        _ => at.naive_utc(),
    };
    naive.format(EXPIRY_FORMAT).to_string()
}

fn parse_expiry(raw: &[u8]) -> Result<DateTime<Utc>> {
    let invalid = || PluginError::DeserializeError(constants::ERR_INVALID_TIMESTAMP.into());

    let text = std::str::from_utf8(raw).map_err(|_| invalid())?;
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let (seconds, millis) = text.split_at(14);
    let naive = NaiveDateTime::parse_from_str(seconds, "%Y%m%d%H%M%S").map_err(|_| invalid())?;
    let millis: u32 = millis.parse().map_err(|_| invalid())?;
    let naive = naive
        .with_nanosecond(millis * 1_000_000)
        .ok_or_else(invalid)?;
    Ok(Utc.from_utc_datetime(&naive))
}
