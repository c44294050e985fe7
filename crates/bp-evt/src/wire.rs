use bp_net::ClientId;

/// `{ClientId:u64, EventId:u16, MessageId:u64, PayloadSize:u32}`, all
/// explicit little-endian; identical layout to the RPC request header
/// modulo the id width staying 16 bits for both.
pub const EVENT_HEADER_SIZE: usize = 8 + 2 + 8 + 4;

pub type EventId = u16;
pub type MessageId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventHeader {
    pub client: ClientId,
    pub event: EventId,
    pub message: MessageId,
    pub payload_size: u32,
}

impl EventHeader {
    pub fn encode(&self, out: &mut [u8; EVENT_HEADER_SIZE]) {
        out[0..8].copy_from_slice(&self.client.0.to_le_bytes());
        out[8..10].copy_from_slice(&self.event.to_le_bytes());
        out[10..18].copy_from_slice(&self.message.to_le_bytes());
        out[18..22].copy_from_slice(&self.payload_size.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= EVENT_HEADER_SIZE);
        Self {
            client: ClientId(u64::from_le_bytes(buf[0..8].try_into().unwrap())),
            event: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            message: u64::from_le_bytes(buf[10..18].try_into().unwrap()),
            payload_size: u32::from_le_bytes(buf[18..22].try_into().unwrap()),
        }
    }

    /// Reads the payload-size field out of a raw header slice; used by
    /// `ByteStream::fetch` before the header is otherwise decoded.
    pub fn payload_len_at(header: &[u8]) -> usize {
        u32::from_le_bytes(header[18..22].try_into().unwrap()) as usize
    }

    pub fn encode_frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(EVENT_HEADER_SIZE + payload.len());
        let mut header = [0u8; EVENT_HEADER_SIZE];
        self.encode(&mut header);
        out.extend_from_slice(&header);
        out.extend_from_slice(payload);
        out
    }
}
