//! The handful of control packets a session lifecycle needs: CONNECT,
//! CONNACK, PINGREQ/PINGRESP and DISCONNECT, for MQTT 3.1.1 and 5.0.

use crate::error::{MqttError, Result};
use crate::request::ProtocolVersion;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const CONNECT: u8 = 0x10;
pub const CONNACK: u8 = 0x20;
pub const PINGREQ: u8 = 0xC0;
pub const PINGRESP: u8 = 0xD0;
pub const DISCONNECT: u8 = 0xE0;

const PROTOCOL_NAME: &[u8] = b"MQTT";
const MAX_REMAINING_LENGTH: u32 = 268_435_455;

mod connect_flags {
    pub const CLEAN_SESSION: u8 = 0x02;
    pub const PASSWORD: u8 = 0x40;
    pub const USERNAME: u8 = 0x80;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket<'a> {
    pub protocol_version: ProtocolVersion,
    pub client_id: &'a str,
    pub clean_session: bool,
    pub keep_alive_secs: u16,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl ConnectPacket<'_> {
    /// # Errors
    ///
    /// Returns an error if a string field exceeds the 65535 byte MQTT limit.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::with_capacity(64);
        put_binary(&mut body, PROTOCOL_NAME)?;
        body.put_u8(self.protocol_version.as_u8());

        let mut flags = 0u8;
        if self.clean_session {
            flags |= connect_flags::CLEAN_SESSION;
        }
        if self.username.is_some() {
            flags |= connect_flags::USERNAME;
        }
        if self.password.is_some() {
            flags |= connect_flags::PASSWORD;
        }
        body.put_u8(flags);
        body.put_u16(self.keep_alive_secs);

        if self.protocol_version == ProtocolVersion::V5 {
            encode_variable_int(&mut body, 0)?;
        }

        put_binary(&mut body, self.client_id.as_bytes())?;
        if let Some(username) = self.username {
            put_binary(&mut body, username.as_bytes())?;
        }
        if let Some(password) = self.password {
            put_binary(&mut body, password)?;
        }

        wrap_fixed_header(CONNECT, &body, buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl ConnAck {
    /// # Errors
    ///
    /// Returns an error if the body is shorter than the mandatory two bytes.
    pub fn decode(mut body: Bytes) -> Result<Self> {
        if body.remaining() < 2 {
            return Err(MqttError::MalformedPacket(format!(
                "CONNACK body too short: {} bytes",
                body.remaining()
            )));
        }
        let flags = body.get_u8();
        let return_code = body.get_u8();
        // v5 properties follow; nothing in them changes whether the session is usable.
        Ok(Self {
            session_present: flags & 0x01 != 0,
            return_code,
        })
    }

    pub fn is_accepted(&self) -> bool {
        self.return_code == 0
    }

    /// Converts a refusal into an error carrying a readable reason.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::ConnectionRefused`] unless the code is 0.
    pub fn into_result(self, version: ProtocolVersion) -> Result<Self> {
        if self.is_accepted() {
            Ok(self)
        } else {
            Err(MqttError::ConnectionRefused {
                code: self.return_code,
                reason: refusal_reason(version, self.return_code),
            })
        }
    }
}

pub fn refusal_reason(version: ProtocolVersion, code: u8) -> &'static str {
    match (version, code) {
        (_, 0x00) => "accepted",
        (ProtocolVersion::V311, 0x01) => "unacceptable protocol version",
        (ProtocolVersion::V311, 0x02) => "identifier rejected",
        (ProtocolVersion::V311, 0x03) => "server unavailable",
        (ProtocolVersion::V311, 0x04) => "bad user name or password",
        (ProtocolVersion::V311, 0x05) => "not authorized",
        (ProtocolVersion::V5, 0x80) => "unspecified error",
        (ProtocolVersion::V5, 0x81) => "malformed packet",
        (ProtocolVersion::V5, 0x82) => "protocol error",
        (ProtocolVersion::V5, 0x83) => "implementation specific error",
        (ProtocolVersion::V5, 0x84) => "unsupported protocol version",
        (ProtocolVersion::V5, 0x85) => "client identifier not valid",
        (ProtocolVersion::V5, 0x86) => "bad user name or password",
        (ProtocolVersion::V5, 0x87) => "not authorized",
        (ProtocolVersion::V5, 0x88) => "server unavailable",
        (ProtocolVersion::V5, 0x89) => "server busy",
        (ProtocolVersion::V5, 0x8A) => "banned",
        (ProtocolVersion::V5, 0x8C) => "bad authentication method",
        (ProtocolVersion::V5, 0x90) => "topic name invalid",
        (ProtocolVersion::V5, 0x95) => "packet too large",
        (ProtocolVersion::V5, 0x97) => "quota exceeded",
        (ProtocolVersion::V5, 0x99) => "payload format invalid",
        (ProtocolVersion::V5, 0x9A) => "retain not supported",
        (ProtocolVersion::V5, 0x9B) => "QoS not supported",
        (ProtocolVersion::V5, 0x9C) => "use another server",
        (ProtocolVersion::V5, 0x9D) => "server moved",
        (ProtocolVersion::V5, 0x9F) => "connection rate exceeded",
        _ => "unknown return code",
    }
}

pub fn encode_pingreq(buf: &mut BytesMut) {
    buf.put_u8(PINGREQ);
    buf.put_u8(0);
}

/// A zero-length DISCONNECT is valid for both versions (v5 implies reason
/// code 0x00, normal disconnection).
pub fn encode_disconnect(buf: &mut BytesMut) {
    buf.put_u8(DISCONNECT);
    buf.put_u8(0);
}

/// One complete control packet split off the read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: u8,
    pub body: Bytes,
}

impl Frame {
    pub fn packet_type(&self) -> u8 {
        self.header & 0xF0
    }
}

/// Accumulates bytes read from a transport and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid remaining-length encoding.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let mut remaining_len: u32 = 0;
        let mut idx = 1;
        let mut shift = 0;
        loop {
            let Some(&byte) = self.buf.get(idx) else {
                return Ok(None);
            };
            idx += 1;
            remaining_len |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 21 {
                return Err(MqttError::MalformedPacket(
                    "Invalid remaining length encoding".to_string(),
                ));
            }
        }

        let total = idx + remaining_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let mut packet = self.buf.split_to(total);
        let header = packet[0];
        packet.advance(idx);
        Ok(Some(Frame {
            header,
            body: packet.freeze(),
        }))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn encode_variable_int(buf: &mut BytesMut, mut value: u32) -> Result<()> {
    if value > MAX_REMAINING_LENGTH {
        return Err(MqttError::MalformedPacket(format!(
            "Variable integer too large: {value}"
        )));
    }
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
    Ok(())
}

fn put_binary(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        MqttError::MalformedPacket(format!(
            "Field too long: {} bytes exceeds maximum of 65535",
            data.len()
        ))
    })?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

fn wrap_fixed_header(first_byte: u8, body: &[u8], buf: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| MqttError::MalformedPacket("Packet too large".to_string()))?;
    buf.reserve(body.len() + 5);
    buf.put_u8(first_byte);
    encode_variable_int(buf, len)?;
    buf.put_slice(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(version: ProtocolVersion) -> ConnectPacket<'static> {
        ConnectPacket {
            protocol_version: version,
            client_id: "t1",
            clean_session: true,
            keep_alive_secs: 60,
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_connect_v311_layout() {
        let mut buf = BytesMut::new();
        connect(ProtocolVersion::V311).encode(&mut buf).unwrap();

        assert_eq!(
            &buf[..],
            &[
                0x10, 14, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // level
                0x02, // clean session
                0x00, 0x3C, // keep alive
                0x00, 0x02, b't', b'1', // client id
            ]
        );
    }

    #[test]
    fn test_connect_v5_has_empty_properties() {
        let mut buf = BytesMut::new();
        connect(ProtocolVersion::V5).encode(&mut buf).unwrap();
        assert_eq!(buf[1], 15);
        assert_eq!(buf[8], 0x05);
        assert_eq!(buf[12], 0x00);
    }

    #[test]
    fn test_connect_credentials_flags() {
        let packet = ConnectPacket {
            username: Some("user"),
            password: Some(b"pw"),
            clean_session: false,
            ..connect(ProtocolVersion::V311)
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();

        assert_eq!(buf[9], 0xC0);
        assert!(buf.ends_with(&[0x00, 0x04, b'u', b's', b'e', b'r', 0x00, 0x02, b'p', b'w']));
    }

    #[test]
    fn test_connack_decode() {
        let ack = ConnAck::decode(Bytes::from_static(&[0x01, 0x00])).unwrap();
        assert!(ack.session_present);
        assert!(ack.is_accepted());

        let err = ConnAck::decode(Bytes::from_static(&[0x00, 0x05]))
            .unwrap()
            .into_result(ProtocolVersion::V311)
            .unwrap_err();
        assert!(matches!(
            err,
            MqttError::ConnectionRefused { code: 0x05, reason: "not authorized" }
        ));

        assert!(ConnAck::decode(Bytes::from_static(&[0x00])).is_err());
    }

    #[test]
    fn test_v5_reason_codes() {
        assert_eq!(
            refusal_reason(ProtocolVersion::V5, 0x86),
            "bad user name or password"
        );
        assert_eq!(refusal_reason(ProtocolVersion::V311, 0x86), "unknown return code");
    }

    #[test]
    fn test_frame_buffer_handles_partial_input() {
        let mut frames = FrameBuffer::new();
        frames.extend(&[0x20]);
        assert!(frames.next_frame().unwrap().is_none());

        frames.extend(&[0x02, 0x00]);
        assert!(frames.next_frame().unwrap().is_none());

        frames.extend(&[0x00, 0xD0, 0x00]);
        let frame = frames.next_frame().unwrap().unwrap();
        assert_eq!(frame.packet_type(), CONNACK);
        assert_eq!(&frame.body[..], &[0x00, 0x00]);

        let frame = frames.next_frame().unwrap().unwrap();
        assert_eq!(frame.packet_type(), PINGRESP);
        assert!(frame.body.is_empty());
        assert!(frames.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_frame_buffer_multibyte_length() {
        let mut frames = FrameBuffer::new();
        let mut packet = vec![0x30, 0xC8, 0x01];
        packet.extend(std::iter::repeat(0xAB).take(200));
        frames.extend(&packet);

        let frame = frames.next_frame().unwrap().unwrap();
        assert_eq!(frame.body.len(), 200);
    }

    #[test]
    fn test_frame_buffer_rejects_bad_length() {
        let mut frames = FrameBuffer::new();
        frames.extend(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(frames.next_frame().is_err());
    }

    #[test]
    fn test_fixed_packets() {
        let mut buf = BytesMut::new();
        encode_pingreq(&mut buf);
        encode_disconnect(&mut buf);
        assert_eq!(&buf[..], &[0xC0, 0x00, 0xE0, 0x00]);
    }
}
