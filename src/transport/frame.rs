//! Wire framing for object streams.
//!
//! A stream body is a sequence of records:
//!
//! ```text
//! | u32 LE header length | bincode ObjHdr | payload (attrs.size bytes) |
//! ```
//!
//! A header whose `attrs.size` equals the tick marker carries no payload and
//! never reaches a receive handler.

use crate::error::{Result, TalusError};
use crate::types::{Bck, ObjAttrs};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Frame header: object identity plus attributes and opaque caller bytes
/// (ack tokens ride in `opaque`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjHdr {
    pub bck: Bck,
    pub objname: String,
    pub opaque: Vec<u8>,
    pub attrs: ObjAttrs,
}

impl ObjHdr {
    pub fn uname(&self) -> String {
        self.bck.uname(&self.objname)
    }

    pub fn tick_marker() -> Self {
        Self {
            bck: Bck::native(""),
            objname: String::new(),
            opaque: Vec::new(),
            attrs: ObjAttrs::tick_marker(),
        }
    }
}

/// Encode one complete record (header + payload) into a single buffer.
pub fn encode_record(hdr: &ObjHdr, payload: &[u8]) -> Result<Bytes> {
    let hdr_bytes = bincode::serialize(hdr)?;
    let mut buf = BytesMut::with_capacity(4 + hdr_bytes.len() + payload.len());
    buf.extend_from_slice(&(hdr_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&hdr_bytes);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

enum DecodeState {
    Len,
    Hdr(usize),
    Payload(ObjHdr, usize),
}

/// Incremental record decoder; feed body chunks, collect complete frames.
pub struct FrameDecoder {
    buf: BytesMut,
    state: DecodeState,
    max_header: usize,
}

impl FrameDecoder {
    pub fn new(max_header: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            state: DecodeState::Len,
            max_header,
        }
    }

    /// Feed a chunk; returns every frame completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<(ObjHdr, Bytes)>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        loop {
            match &self.state {
                DecodeState::Len => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    let len_bytes: [u8; 4] = self.buf[..4].try_into().expect("4 bytes");
                    let hlen = u32::from_le_bytes(len_bytes) as usize;
                    if hlen > self.max_header {
                        return Err(TalusError::HeaderTooLarge {
                            got: hlen,
                            limit: self.max_header,
                        });
                    }
                    let _ = self.buf.split_to(4);
                    self.state = DecodeState::Hdr(hlen);
                }
                DecodeState::Hdr(hlen) => {
                    let hlen = *hlen;
                    if self.buf.len() < hlen {
                        break;
                    }
                    let hdr_bytes = self.buf.split_to(hlen);
                    let hdr: ObjHdr = bincode::deserialize(&hdr_bytes)?;
                    let psize = if hdr.attrs.is_tick_marker() {
                        0
                    } else {
                        hdr.attrs.size.max(0) as usize
                    };
                    self.state = DecodeState::Payload(hdr, psize);
                }
                DecodeState::Payload(_, psize) => {
                    let psize = *psize;
                    if self.buf.len() < psize {
                        break;
                    }
                    let payload = self.buf.split_to(psize).freeze();
                    let hdr = match std::mem::replace(&mut self.state, DecodeState::Len) {
                        DecodeState::Payload(hdr, _) => hdr,
                        _ => unreachable!(),
                    };
                    out.push((hdr, payload));
                }
            }
        }
        Ok(out)
    }

    /// True when no partial record is buffered.
    pub fn is_clean(&self) -> bool {
        matches!(self.state, DecodeState::Len) && self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hdr(name: &str, size: i64) -> ObjHdr {
        ObjHdr {
            bck: Bck::native("bck1"),
            objname: name.to_string(),
            opaque: vec![1, 2, 3],
            attrs: ObjAttrs {
                size,
                atime: 42,
                version: "1".to_string(),
                cksum_type: "xxh3".to_string(),
                cksum_value: "abcd".to_string(),
            },
        }
    }

    #[test]
    fn test_single_record() {
        let hdr = make_hdr("obj1", 5);
        let rec = encode_record(&hdr, b"hello").unwrap();
        let mut dec = FrameDecoder::new(4096);
        let frames = dec.feed(&rec).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, hdr);
        assert_eq!(&frames[0].1[..], b"hello");
        assert!(dec.is_clean());
    }

    #[test]
    fn test_split_across_chunks() {
        let hdr = make_hdr("obj1", 6);
        let rec = encode_record(&hdr, b"abcdef").unwrap();
        let mut dec = FrameDecoder::new(4096);
        // drip one byte at a time
        let mut frames = Vec::new();
        for b in rec.iter() {
            frames.extend(dec.feed(&[*b]).unwrap());
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].1[..], b"abcdef");
    }

    #[test]
    fn test_back_to_back_records() {
        let mut buf = Vec::new();
        for i in 0..3 {
            let hdr = make_hdr(&format!("obj{}", i), 3);
            buf.extend_from_slice(&encode_record(&hdr, b"xyz").unwrap());
        }
        let mut dec = FrameDecoder::new(4096);
        let frames = dec.feed(&buf).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].0.objname, "obj2");
    }

    #[test]
    fn test_tick_marker_has_no_payload() {
        let rec = encode_record(&ObjHdr::tick_marker(), &[]).unwrap();
        let mut dec = FrameDecoder::new(4096);
        let frames = dec.feed(&rec).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].0.attrs.is_tick_marker());
        assert!(frames[0].1.is_empty());
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut dec = FrameDecoder::new(16);
        let bad = (1024u32).to_le_bytes();
        assert!(matches!(
            dec.feed(&bad),
            Err(TalusError::HeaderTooLarge { .. })
        ));
    }
}
