use crate::Error;

use super::HEADER_LEN;

/*
Every CAP datagram starts with a 12-byte header, network byte order:

     0                   1                   2                   3
     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    +-------+-------------------------------------------------------+
    | Type  |                    Reserved                           |
    +-------+-------------------------------------------------------+
    |                      Sequence Number                          |
    +---------------------------------------------------------------+
    |                   Acknowledgment Number                       |
    +---------------------------------------------------------------+

The payload follows the header with no separator. Reserved bits are zero on
send and ignored on receive.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Syn = 1,
    SynAck = 2,
    Data = 3,
    DataAck = 4,
    Fin = 5,
    FinAck = 6,
}

impl SegmentKind {
    fn from_wire(nibble: u8) -> Option<Self> {
        match nibble {
            1 => Some(SegmentKind::Syn),
            2 => Some(SegmentKind::SynAck),
            3 => Some(SegmentKind::Data),
            4 => Some(SegmentKind::DataAck),
            5 => Some(SegmentKind::Fin),
            6 => Some(SegmentKind::FinAck),
            _ => None,
        }
    }

    /// The acknowledgment field is only meaningful on these kinds; it is
    /// zeroed on the wire for every other kind.
    pub fn carries_ack(self) -> bool {
        matches!(
            self,
            SegmentKind::SynAck | SegmentKind::DataAck | SegmentKind::FinAck
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub seq: u32,
    pub ack: u32,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(kind: SegmentKind, seq: u32, ack: u32) -> Self {
        Segment {
            kind,
            seq,
            ack: if kind.carries_ack() { ack } else { 0 },
            payload: Vec::new(),
        }
    }

    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Segment {
            kind: SegmentKind::Data,
            seq,
            ack: 0,
            payload,
        }
    }

    /// Encoding never fails; payload oversizing is caught upstream.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());

        buf.push((self.kind as u8) << 4);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        let ack = if self.kind.carries_ack() { self.ack } else { 0 };
        buf.extend_from_slice(&ack.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::MalformedSegment("datagram shorter than header"));
        }

        let kind = SegmentKind::from_wire(buf[0] >> 4)
            .ok_or(Error::MalformedSegment("unknown segment type"))?;

        let seq = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let ack = u32::from_be_bytes(buf[8..12].try_into().unwrap());

        Ok(Segment {
            kind,
            seq,
            ack: if kind.carries_ack() { ack } else { 0 },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_round_trip() {
        let seg = Segment::data(0xDEAD_BEEF, b"hello".to_vec());
        let wire = seg.encode();

        assert_eq!(wire.len(), HEADER_LEN + 5);
        assert_eq!(Segment::decode(&wire).unwrap(), seg);
    }

    #[test]
    fn ack_round_trip() {
        let seg = Segment::new(SegmentKind::DataAck, 7, 42);
        let wire = seg.encode();

        assert_eq!(wire.len(), HEADER_LEN);
        let back = Segment::decode(&wire).unwrap();
        assert_eq!(back.ack, 42);
        assert_eq!(back, seg);
    }

    #[test]
    fn header_layout_is_big_endian() {
        let wire = Segment::new(SegmentKind::SynAck, 0x0102_0304, 0x0A0B_0C0D).encode();

        assert_eq!(wire[0], 2 << 4);
        assert_eq!(&wire[1..4], &[0, 0, 0]);
        assert_eq!(&wire[4..8], &[1, 2, 3, 4]);
        assert_eq!(&wire[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn ack_zeroed_when_not_meaningful() {
        let mut seg = Segment::new(SegmentKind::Syn, 1, 0);
        seg.ack = 99;
        let wire = seg.encode();

        assert_eq!(&wire[8..12], &[0, 0, 0, 0]);
        assert_eq!(Segment::decode(&wire).unwrap().ack, 0);
    }

    #[test]
    fn reserved_bits_ignored_on_decode() {
        let mut wire = Segment::data(5, b"x".to_vec()).encode();
        wire[0] |= 0x0F;
        wire[1] = 0xFF;
        wire[2] = 0xAA;
        wire[3] = 0x55;

        let seg = Segment::decode(&wire).unwrap();
        assert_eq!(seg.kind, SegmentKind::Data);
        assert_eq!(seg.seq, 5);
        assert_eq!(seg.payload, b"x");
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(
            Segment::decode(&[0u8; 11]),
            Err(Error::MalformedSegment(_))
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut wire = Segment::data(1, Vec::new()).encode();
        wire[0] = 7 << 4;
        assert!(matches!(
            Segment::decode(&wire),
            Err(Error::MalformedSegment(_))
        ));

        wire[0] = 0;
        assert!(matches!(
            Segment::decode(&wire),
            Err(Error::MalformedSegment(_))
        ));
    }
}
