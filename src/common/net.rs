//! Network utilities

use crate::{Error, Result};
use socket2::SockRef;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// SOCKS5 address type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Address {
    /// Parse an ATYP-tagged address and port from SOCKS5 wire format
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Self, u16)> {
        let mut atyp = [0u8; 1];
        reader.read_exact(&mut atyp).await?;

        match atyp[0] {
            0x01 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                let addr = Address::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((addr, port))
            }
            0x03 => {
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                let len = len[0] as usize;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                let domain = String::from_utf8(buf[..len].to_vec())
                    .map_err(|e| Error::address(format!("Invalid domain: {}", e)))?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                Ok((Address::Domain(domain), port))
            }
            0x04 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                let addr = Address::Ipv6(Ipv6Addr::from(ip));
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((addr, port))
            }
            t => Err(Error::address(format!("Unknown address type: {}", t))),
        }
    }

    /// Encode in SOCKS5 wire format: ATYP, address, port
    pub fn to_bytes(&self, port: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        match self {
            Address::Ipv4(ip) => {
                buf.push(0x01);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Ipv6(ip) => {
                buf.push(0x04);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let bytes = domain.as_bytes();
                debug_assert!(bytes.len() <= 255);
                buf.push(0x03);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
        }
        buf.extend_from_slice(&port.to_be_bytes());
        buf
    }

    /// Encoded length: ATYP + address + port
    pub fn wire_len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,
            Address::Ipv6(_) => 1 + 16 + 2,
            Address::Domain(d) => 1 + 1 + d.len() + 2,
        }
    }

    /// Render as a dialable `host:port` string
    pub fn to_string_with_port(&self, port: u16) -> String {
        match self {
            Address::Ipv4(ip) => format!("{}:{}", ip, port),
            Address::Ipv6(ip) => format!("[{}]:{}", ip, port),
            Address::Domain(d) => format!("{}:{}", d, port),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl From<String> for Address {
    fn from(host: String) -> Self {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip);
        }
        if let Ok(ip) = host.parse::<Ipv6Addr>() {
            return Address::Ipv6(ip);
        }
        Address::Domain(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_address_roundtrip_ipv4() {
        let addr = Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1));
        let bytes = addr.to_bytes(8080);
        assert_eq!(bytes.len(), addr.wire_len());

        let (parsed, port) = Address::read_from(&mut &bytes[..]).await.unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(port, 8080);
    }

    #[tokio::test]
    async fn test_address_roundtrip_domain() {
        let addr = Address::Domain("example.com".to_string());
        let bytes = addr.to_bytes(80);
        assert_eq!(bytes[0], 0x03);
        assert_eq!(bytes[1], 11);
        assert_eq!(&bytes[bytes.len() - 2..], &[0x00, 0x50]);

        let (parsed, port) = Address::read_from(&mut &bytes[..]).await.unwrap();
        assert_eq!(parsed.to_string_with_port(port), "example.com:80");
    }

    #[tokio::test]
    async fn test_address_unknown_atyp() {
        let bytes = [0x05u8, 0, 0, 0, 0, 0, 0];
        let err = Address::read_from(&mut &bytes[..]).await.unwrap_err();
        assert!(matches!(err, Error::Address(_)));
    }

    #[test]
    fn test_address_from_host() {
        assert!(matches!(
            Address::from("10.0.0.1".to_string()),
            Address::Ipv4(_)
        ));
        assert!(matches!(
            Address::from("example.com".to_string()),
            Address::Domain(_)
        ));
    }
}
