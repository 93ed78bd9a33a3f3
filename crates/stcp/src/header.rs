// 20-byte TCP-shaped header: source/dest port are carried for byte
// compatibility with a real tcphdr layout but unused by a single-connection
// substrate; data offset is always 5 (no options).

pub const HEADER_SIZE: usize = 20;
pub const DATA_OFFSET_WORDS: u8 = 5;

pub const TH_FIN: u8 = 0x01;
pub const TH_SYN: u8 = 0x02;
pub const TH_RST: u8 = 0x04;
pub const TH_PUSH: u8 = 0x08;
pub const TH_ACK: u8 = 0x10;
pub const TH_URG: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
}

impl Header {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        // src_port, dst_port: unused, left zeroed.
        out[4..8].copy_from_slice(&self.seq.to_be_bytes());
        out[8..12].copy_from_slice(&self.ack.to_be_bytes());
        out[12] = DATA_OFFSET_WORDS << 4;
        out[13] = self.flags;
        out[14..16].copy_from_slice(&self.window.to_be_bytes());
        // checksum, urgent pointer: unused, left zeroed.
        out
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            seq: u32::from_be_bytes(buf[4..8].try_into().ok()?),
            ack: u32::from_be_bytes(buf[8..12].try_into().ok()?),
            flags: buf[13],
            window: u16::from_be_bytes(buf[14..16].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = Header { seq: 100, ack: 200, flags: TH_SYN | TH_ACK, window: 3072 };
        let bytes = h.to_bytes();
        let parsed = Header::parse(&bytes).unwrap();
        assert_eq!(h, parsed);
        assert!(parsed.has_flag(TH_SYN));
        assert!(parsed.has_flag(TH_ACK));
        assert!(!parsed.has_flag(TH_FIN));
    }
}
