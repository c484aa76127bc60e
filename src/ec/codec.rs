//! Reed-Solomon slice encode/decode.

use crate::error::{Result, TalusError};
use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::debug;

/// Size of one slice for an object of `obj_size` bytes split into
/// `data_slices` slices. All slices are equal-sized; the last one is padded
/// with zeros.
pub fn slice_size(obj_size: i64, data_slices: usize) -> i64 {
    let k = data_slices.max(1) as i64;
    (obj_size + k - 1) / k
}

/// Encoder/decoder for object slices.
pub struct SliceCodec {
    data_slices: usize,
    parity_slices: usize,
    engine: ReedSolomon,
}

impl SliceCodec {
    pub fn new(data_slices: usize, parity_slices: usize) -> Result<Self> {
        let engine = ReedSolomon::new(data_slices, parity_slices)
            .map_err(|e| TalusError::Internal(format!("failed to create codec: {}", e)))?;
        Ok(Self {
            data_slices,
            parity_slices,
            engine,
        })
    }

    pub fn total_slices(&self) -> usize {
        self.data_slices + self.parity_slices
    }

    /// Split `data` into equal-sized data slices (zero-padded) and append
    /// computed parity slices.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let ssize = slice_size(data.len() as i64, self.data_slices) as usize;
        let mut slices: Vec<Vec<u8>> = (0..self.data_slices)
            .map(|i| {
                let start = (i * ssize).min(data.len());
                let end = ((i + 1) * ssize).min(data.len());
                let mut slice = data[start..end].to_vec();
                slice.resize(ssize, 0);
                slice
            })
            .collect();
        for _ in 0..self.parity_slices {
            slices.push(vec![0u8; ssize]);
        }
        self.engine
            .encode(&mut slices)
            .map_err(|e| TalusError::Internal(format!("encoding failed: {}", e)))?;
        debug!(
            obj_size = data.len(),
            slice_size = ssize,
            slices = slices.len(),
            "object encoded"
        );
        Ok(slices)
    }

    /// Reconstruct the original object from surviving slices. `slices` holds
    /// `data + parity` entries; `None` marks a missing slice.
    pub fn decode(&self, slices: &mut [Option<Vec<u8>>], obj_size: i64) -> Result<Vec<u8>> {
        let have = slices.iter().filter(|s| s.is_some()).count();
        if have < self.data_slices {
            return Err(TalusError::InsufficientSlices {
                have,
                need: self.data_slices,
            });
        }
        if slices.len() != self.total_slices() {
            return Err(TalusError::Internal(format!(
                "expected {} slices, got {}",
                self.total_slices(),
                slices.len()
            )));
        }
        self.engine
            .reconstruct(slices)
            .map_err(|e| TalusError::Internal(format!("reconstruction failed: {}", e)))?;

        let mut out = Vec::with_capacity(obj_size.max(0) as usize);
        for slice in slices.iter().take(self.data_slices) {
            match slice {
                Some(data) => out.extend_from_slice(data),
                None => {
                    return Err(TalusError::Internal("reconstruction incomplete".into()));
                }
            }
        }
        out.truncate(obj_size.max(0) as usize);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_size_padding() {
        assert_eq!(slice_size(100, 4), 25);
        assert_eq!(slice_size(101, 4), 26);
        assert_eq!(slice_size(0, 4), 0);
    }

    #[test]
    fn test_encode_decode_with_losses() {
        let codec = SliceCodec::new(4, 2).unwrap();
        let data: Vec<u8> = (0..1001u32).map(|i| (i % 251) as u8).collect();

        let encoded = codec.encode(&data).unwrap();
        assert_eq!(encoded.len(), 6);

        // lose two slices (the tolerance limit)
        let mut partial: Vec<Option<Vec<u8>>> = encoded.into_iter().map(Some).collect();
        partial[0] = None;
        partial[4] = None;

        let restored = codec.decode(&mut partial, data.len() as i64).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_too_many_losses() {
        let codec = SliceCodec::new(4, 2).unwrap();
        let data = vec![7u8; 512];
        let encoded = codec.encode(&data).unwrap();

        let mut partial: Vec<Option<Vec<u8>>> = encoded.into_iter().map(Some).collect();
        partial[0] = None;
        partial[1] = None;
        partial[2] = None;

        assert!(matches!(
            codec.decode(&mut partial, 512),
            Err(TalusError::InsufficientSlices { have: 3, need: 4 })
        ));
    }
}
