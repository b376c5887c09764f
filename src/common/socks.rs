//! SOCKS5 ingress protocol (RFC 1928, CONNECT only, no authentication)

use super::net::Address;
use crate::{Error, Result};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;

// SOCKS5 address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Canned CONNECT success reply. Compliant clients ignore the bound
/// address/port fields; the trailing port bytes are stable on the wire.
pub const CONNECT_REPLY: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x80, 0x88];

/// SOCKS5 method negotiation greeting
#[derive(Debug)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;

        if head[0] != SOCKS5_VERSION {
            return Err(Error::protocol(format!(
                "Unsupported SOCKS version: {}",
                head[0]
            )));
        }

        let mut methods = vec![0u8; head[1] as usize];
        reader.read_exact(&mut methods).await?;

        Ok(Greeting { methods })
    }
}

impl fmt::Display for Greeting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Socks5 Negotiation]")?;
        for &m in &self.methods {
            write!(f, " [{}]", method_meaning(m))?;
        }
        Ok(())
    }
}

fn method_meaning(n: u8) -> &'static str {
    match n {
        0x00 => "NO AUTHENTICATION REQUIRED",
        0x01 => "GSSAPI",
        0x02 => "USERNAME/PASSWORD",
        0x03..=0x7f => "IANA ASSIGNED",
        0x80..=0xfe => "RESERVED FOR PRIVATE METHODS",
        _ => "NO ACCEPTABLE METHODS",
    }
}

fn command_meaning(n: u8) -> &'static str {
    match n {
        0x01 => "CONNECT",
        0x02 => "BIND",
        0x03 => "UDP ASSOCIATE",
        _ => "Unknown Command",
    }
}

/// Accept the greeting with the no-authentication method
pub async fn reply_no_auth<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await?;
    Ok(())
}

/// Acknowledge a CONNECT with the canned success reply
pub async fn reply_success<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&CONNECT_REPLY).await?;
    Ok(())
}

/// Parsed SOCKS5 CONNECT request
#[derive(Debug)]
pub struct ConnectRequest {
    pub address: Address,
    pub port: u16,
    /// Wire bytes from ATYP through the port, re-emitted verbatim as the
    /// tunnel record's destination header.
    pub raw_addr: Vec<u8>,
}

impl ConnectRequest {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;

        if header[0] != SOCKS5_VERSION {
            return Err(Error::protocol(format!(
                "Unsupported SOCKS version: {}",
                header[0]
            )));
        }
        if header[1] != CMD_CONNECT {
            return Err(Error::protocol(format!(
                "Unsupported command: {}",
                command_meaning(header[1])
            )));
        }
        // header[2] is the reserved byte

        let atyp = header[3];
        let mut raw_addr = vec![atyp];
        match atyp {
            ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                raw_addr.extend_from_slice(&buf);
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                let mut buf = vec![0u8; len[0] as usize + 2];
                reader.read_exact(&mut buf).await?;
                raw_addr.push(len[0]);
                raw_addr.extend_from_slice(&buf);
            }
            ATYP_IPV6 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await?;
                raw_addr.extend_from_slice(&buf);
            }
            t => {
                return Err(Error::protocol(format!("Unknown address type: {}", t)));
            }
        }

        let (address, port) = Address::read_from(&mut &raw_addr[..]).await?;

        Ok(ConnectRequest {
            address,
            port,
            raw_addr,
        })
    }

    /// Destination rendered as `host:port`
    pub fn destination(&self) -> String {
        self.address.to_string_with_port(self.port)
    }
}

impl fmt::Display for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Socks5 Request] [Command:{}] [{}]",
            command_meaning(CMD_CONNECT),
            self.destination()
        )
    }
}
