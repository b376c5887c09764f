//! Framed records carried over the encrypted stream
//!
//! Wire layout, all integers big-endian:
//!
//! ```text
//!  offset        size        field
//!  0             1           type (0=MEANINGLESS, 1=REQUEST, 2=RESPONSE)
//!  1             16          id (UUID correlation token)
//!  17            2           addr_len
//!  19            addr_len    addr (SOCKS5 ATYP-tagged destination)
//!  19+addr_len   4           payload_len
//!  23+addr_len   payload_len payload
//! ```

use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

pub const RECORD_ID_LEN: usize = 16;

/// Upper bound on a single record payload; anything larger is treated as a
/// framing failure.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Record type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficKind {
    Meaningless,
    Request,
    Response,
}

impl TryFrom<u8> for TrafficKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TrafficKind::Meaningless),
            1 => Ok(TrafficKind::Request),
            2 => Ok(TrafficKind::Response),
            t => Err(Error::decode(format!("invalid record type: {}", t))),
        }
    }
}

impl From<TrafficKind> for u8 {
    fn from(kind: TrafficKind) -> u8 {
        match kind {
            TrafficKind::Meaningless => 0,
            TrafficKind::Request => 1,
            TrafficKind::Response => 2,
        }
    }
}

/// One framed tunnel record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traffic {
    pub kind: TrafficKind,
    pub id: Uuid,
    /// SOCKS5 ATYP-tagged destination, verbatim wire bytes
    pub addr: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Traffic {
    pub fn new(kind: TrafficKind, addr: Vec<u8>, payload: Vec<u8>) -> Self {
        Traffic {
            kind,
            id: Uuid::new_v4(),
            addr,
            payload,
        }
    }

    pub fn request(addr: Vec<u8>, payload: Vec<u8>) -> Self {
        Traffic::new(TrafficKind::Request, addr, payload)
    }

    pub fn meaningless(addr: Vec<u8>, payload: Vec<u8>) -> Self {
        Traffic::new(TrafficKind::Meaningless, addr, payload)
    }

    pub fn response(addr: Vec<u8>, payload: Vec<u8>) -> Self {
        Traffic::new(TrafficKind::Response, addr, payload)
    }

    /// Encoded length on the wire
    pub fn wire_len(&self) -> usize {
        1 + RECORD_ID_LEN + 2 + self.addr.len() + 4 + self.payload.len()
    }

    /// Serialize into a single buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        debug_assert!(self.addr.len() <= u16::MAX as usize);
        debug_assert!(self.payload.len() <= u32::MAX as usize);

        let mut buf = Vec::with_capacity(self.wire_len());
        buf.push(u8::from(self.kind));
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&(self.addr.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.addr);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one record, reading strictly in wire order. Fails fast on an
    /// unknown type tag before touching the rest of the header.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag).await?;
        let kind = TrafficKind::try_from(tag[0])?;

        let mut id = [0u8; RECORD_ID_LEN];
        reader.read_exact(&mut id).await?;
        let id = Uuid::from_slice(&id).map_err(|_| Error::decode("invalid record id"))?;

        let mut addr_len = [0u8; 2];
        reader.read_exact(&mut addr_len).await?;
        let mut addr = vec![0u8; u16::from_be_bytes(addr_len) as usize];
        reader.read_exact(&mut addr).await?;

        let mut payload_len = [0u8; 4];
        reader.read_exact(&mut payload_len).await?;
        let payload_len = u32::from_be_bytes(payload_len) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::decode(format!(
                "payload length {} exceeds limit",
                payload_len
            )));
        }
        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload).await?;

        Ok(Traffic {
            kind,
            id,
            addr,
            payload,
        })
    }
}
