use bp_net::ClientId;

/// `{ClientId:u64, ProcedureId:u16, MessageId:u64, PayloadSize:u32}`, all
/// explicit little-endian.
pub const REQUEST_HEADER_SIZE: usize = 8 + 2 + 8 + 4;
/// `{Status:u32, PayloadSize:u32}`.
pub const RESPONSE_HEADER_SIZE: usize = 4 + 4;

pub type ProcedureId = u16;
pub type MessageId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub client: ClientId,
    pub procedure: ProcedureId,
    pub message: MessageId,
    pub payload_size: u32,
}

impl RequestHeader {
    pub fn encode(&self, out: &mut [u8; REQUEST_HEADER_SIZE]) {
        out[0..8].copy_from_slice(&self.client.0.to_le_bytes());
        out[8..10].copy_from_slice(&self.procedure.to_le_bytes());
        out[10..18].copy_from_slice(&self.message.to_le_bytes());
        out[18..22].copy_from_slice(&self.payload_size.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= REQUEST_HEADER_SIZE);
        Self {
            client: ClientId(u64::from_le_bytes(buf[0..8].try_into().unwrap())),
            procedure: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            message: u64::from_le_bytes(buf[10..18].try_into().unwrap()),
            payload_size: u32::from_le_bytes(buf[18..22].try_into().unwrap()),
        }
    }

    /// Reads the payload-size field out of a raw header slice; used by
    /// `ByteStream::fetch` before the header is otherwise decoded.
    pub fn payload_len_at(header: &[u8]) -> usize {
        u32::from_le_bytes(header[18..22].try_into().unwrap()) as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    WrongArgs = 1,
    Timeout = 2,
    NotFound = 3,
    AlreadyExists = 4,
    PermissionDenied = 5,
    Protocol = 6,
}

impl Status {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Ok,
            1 => Self::WrongArgs,
            2 => Self::Timeout,
            3 => Self::NotFound,
            4 => Self::AlreadyExists,
            5 => Self::PermissionDenied,
            6 => Self::Protocol,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: Status,
    pub payload_size: u32,
}

impl ResponseHeader {
    pub fn encode(&self, out: &mut [u8; RESPONSE_HEADER_SIZE]) {
        out[0..4].copy_from_slice(&(self.status as u32).to_le_bytes());
        out[4..8].copy_from_slice(&self.payload_size.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= RESPONSE_HEADER_SIZE);
        let status = Status::from_u32(u32::from_le_bytes(buf[0..4].try_into().unwrap()))
            .unwrap_or(Status::Protocol);
        let payload_size = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        Self { status, payload_size }
    }

    pub fn payload_len_at(header: &[u8]) -> usize {
        u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_roundtrip() {
        let h = RequestHeader {
            client: ClientId(7),
            procedure: 42,
            message: 99,
            payload_size: 4,
        };
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        h.encode(&mut buf);
        assert_eq!(RequestHeader::decode(&buf), h);
        assert_eq!(RequestHeader::payload_len_at(&buf), 4);
    }

    #[test]
    fn response_header_roundtrip() {
        let h = ResponseHeader { status: Status::Ok, payload_size: 4 };
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        h.encode(&mut buf);
        assert_eq!(ResponseHeader::decode(&buf), h);
    }
}
