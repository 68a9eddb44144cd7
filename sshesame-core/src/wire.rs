//! Encode/decode for the SSH-defined (RFC 4254) payload structs carried by
//! the request types this engine handles.
//!
//! The underlying SSH library (`russh`) already parses the well-known
//! channel/global requests into typed callback arguments for the purpose of
//! actually dispatching them; this module independently re-implements the
//! same wire layout so that (a) unsupported-in-context requests can be
//! logged with a faithfully re-encoded raw payload (see `connection.rs`),
//! and (b) re-encoding a parsed payload's fields yields a byte sequence
//! that re-parses to the same struct, which the tests below check
//! directly.

use crate::error::{CoreError, Result};

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let end = *pos + 4;
    let bytes: [u8; 4] = buf
        .get(*pos..end)
        .ok_or(CoreError::MalformedPayload("truncated uint32"))?
        .try_into()
        .map_err(|_| CoreError::MalformedPayload("truncated uint32"))?;
    *pos = end;
    Ok(u32::from_be_bytes(bytes))
}

fn read_bool(buf: &[u8], pos: &mut usize) -> Result<bool> {
    let byte = *buf
        .get(*pos)
        .ok_or(CoreError::MalformedPayload("truncated boolean"))?;
    *pos += 1;
    Ok(byte != 0)
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = read_u32(buf, pos)? as usize;
    let end = *pos + len;
    let bytes = buf
        .get(*pos..end)
        .ok_or(CoreError::MalformedPayload("truncated string"))?
        .to_vec();
    *pos = end;
    Ok(bytes)
}

fn read_utf8(buf: &[u8], pos: &mut usize) -> Result<String> {
    String::from_utf8(read_string(buf, pos)?)
        .map_err(|_| CoreError::MalformedPayload("string is not valid utf-8"))
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(u8::from(v));
}

fn write_string(buf: &mut Vec<u8>, s: &[u8]) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s);
}

/// A terminal mode opcode/value pair as carried in a `pty-req` mode string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalMode {
    pub opcode: u8,
    pub value: u32,
}

fn encode_modes(modes: &[TerminalMode]) -> Vec<u8> {
    let mut out = Vec::with_capacity(modes.len() * 5 + 1);
    for mode in modes {
        out.push(mode.opcode);
        out.extend_from_slice(&mode.value.to_be_bytes());
    }
    out.push(0); // TTY_OP_END
    out
}

fn decode_modes(raw: &[u8]) -> Vec<TerminalMode> {
    let mut modes = Vec::new();
    let mut pos = 0;
    while pos < raw.len() {
        let opcode = raw[pos];
        if opcode == 0 {
            break;
        }
        pos += 1;
        if pos + 4 > raw.len() {
            break;
        }
        let value = u32::from_be_bytes([raw[pos], raw[pos + 1], raw[pos + 2], raw[pos + 3]]);
        pos += 4;
        modes.push(TerminalMode { opcode, value });
    }
    modes
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequestPayload {
    pub term: String,
    pub width: u32,
    pub height: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub modes: Vec<TerminalMode>,
}

impl PtyRequestPayload {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let term = read_utf8(buf, &mut pos)?;
        let width = read_u32(buf, &mut pos)?;
        let height = read_u32(buf, &mut pos)?;
        let pixel_width = read_u32(buf, &mut pos)?;
        let pixel_height = read_u32(buf, &mut pos)?;
        let raw_modes = read_string(buf, &mut pos)?;
        Ok(Self {
            term,
            width,
            height,
            pixel_width,
            pixel_height,
            modes: decode_modes(&raw_modes),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_string(&mut buf, self.term.as_bytes());
        write_u32(&mut buf, self.width);
        write_u32(&mut buf, self.height);
        write_u32(&mut buf, self.pixel_width);
        write_u32(&mut buf, self.pixel_height);
        write_string(&mut buf, &encode_modes(&self.modes));
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvRequestPayload {
    pub name: String,
    pub value: String,
}

impl EnvRequestPayload {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let name = read_utf8(buf, &mut pos)?;
        let value = read_utf8(buf, &mut pos)?;
        Ok(Self { name, value })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_string(&mut buf, self.name.as_bytes());
        write_string(&mut buf, self.value.as_bytes());
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequestPayload {
    pub command: String,
}

impl ExecRequestPayload {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        Ok(Self {
            command: read_utf8(buf, &mut pos)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_string(&mut buf, self.command.as_bytes());
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemRequestPayload {
    pub name: String,
}

impl SubsystemRequestPayload {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        Ok(Self {
            name: read_utf8(buf, &mut pos)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_string(&mut buf, self.name.as_bytes());
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChangePayload {
    pub width: u32,
    pub height: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl WindowChangePayload {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        Ok(Self {
            width: read_u32(buf, &mut pos)?,
            height: read_u32(buf, &mut pos)?,
            pixel_width: read_u32(buf, &mut pos)?,
            pixel_height: read_u32(buf, &mut pos)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u32(&mut buf, self.width);
        write_u32(&mut buf, self.height);
        write_u32(&mut buf, self.pixel_width);
        write_u32(&mut buf, self.pixel_height);
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X11RequestPayload {
    pub single_connection: bool,
    pub auth_protocol: String,
    pub auth_cookie: String,
    pub screen_number: u32,
}

impl X11RequestPayload {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        Ok(Self {
            single_connection: read_bool(buf, &mut pos)?,
            auth_protocol: read_utf8(buf, &mut pos)?,
            auth_cookie: read_utf8(buf, &mut pos)?,
            screen_number: read_u32(buf, &mut pos)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_bool(&mut buf, self.single_connection);
        write_string(&mut buf, self.auth_protocol.as_bytes());
        write_string(&mut buf, self.auth_cookie.as_bytes());
        write_u32(&mut buf, self.screen_number);
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpipForwardPayload {
    pub address: String,
    pub port: u32,
}

impl TcpipForwardPayload {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        Ok(Self {
            address: read_utf8(buf, &mut pos)?,
            port: read_u32(buf, &mut pos)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_string(&mut buf, self.address.as_bytes());
        write_u32(&mut buf, self.port);
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectTcpipPayload {
    pub address: String,
    pub port: u32,
    pub originator_address: String,
    pub originator_port: u32,
}

impl DirectTcpipPayload {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        Ok(Self {
            address: read_utf8(buf, &mut pos)?,
            port: read_u32(buf, &mut pos)?,
            originator_address: read_utf8(buf, &mut pos)?,
            originator_port: read_u32(buf, &mut pos)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_string(&mut buf, self.address.as_bytes());
        write_u32(&mut buf, self.port);
        write_string(&mut buf, self.originator_address.as_bytes());
        write_u32(&mut buf, self.originator_port);
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatusPayload {
    pub code: u32,
}

impl ExitStatusPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u32(&mut buf, self.code);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pty_request_round_trips() {
        let payload = PtyRequestPayload {
            term: "xterm-256color".into(),
            width: 80,
            height: 24,
            pixel_width: 0,
            pixel_height: 0,
            modes: vec![TerminalMode {
                opcode: 1,
                value: 3,
            }],
        };
        let encoded = payload.encode();
        assert_eq!(PtyRequestPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn env_request_round_trips() {
        let payload = EnvRequestPayload {
            name: "LANG".into(),
            value: "en_US.UTF-8".into(),
        };
        assert_eq!(
            EnvRequestPayload::decode(&payload.encode()).unwrap(),
            payload
        );
    }

    #[test]
    fn direct_tcpip_round_trips() {
        let payload = DirectTcpipPayload {
            address: "example.org".into(),
            port: 80,
            originator_address: "10.0.0.1".into(),
            originator_port: 54321,
        };
        assert_eq!(
            DirectTcpipPayload::decode(&payload.encode()).unwrap(),
            payload
        );
    }

    #[test]
    fn tcpip_forward_round_trips() {
        let payload = TcpipForwardPayload {
            address: "0.0.0.0".into(),
            port: 0,
        };
        assert_eq!(
            TcpipForwardPayload::decode(&payload.encode()).unwrap(),
            payload
        );
    }

    #[test]
    fn truncated_string_is_malformed() {
        let buf = [0, 0, 0, 10, b'h', b'i']; // claims length 10, only 2 bytes follow
        assert!(EnvRequestPayload::decode(&buf).is_err());
    }

    #[test]
    fn window_change_round_trips() {
        let payload = WindowChangePayload {
            width: 120,
            height: 40,
            pixel_width: 0,
            pixel_height: 0,
        };
        assert_eq!(
            WindowChangePayload::decode(&payload.encode()).unwrap(),
            payload
        );
    }
}
