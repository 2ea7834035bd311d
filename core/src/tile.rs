use std::ops::Deref;

/// Side length of a tile, in pixels.
pub const TILE_SIDE: usize = 4096;

/// Number of bytes in one tile's payload (`TILE_SIDE * TILE_SIDE`).
pub const TILE_PAYLOAD_LEN: usize = TILE_SIDE * TILE_SIDE;

/// The derived classification of a tile's bytes. Not stored explicitly in
/// memory — always recomputed from the payload or read back from the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileCategory {
    Regular = 0,
    AllZero = 1,
    AllOne = 2,
}

impl TileCategory {
    /// Classify a payload by scanning its bytes.
    pub fn classify(payload: &[u8]) -> Self {
        if payload.iter().all(|&b| b == 0x00) {
            TileCategory::AllZero
        } else if payload.iter().all(|&b| b == 0x01) {
            TileCategory::AllOne
        } else {
            TileCategory::Regular
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(TileCategory::Regular),
            1 => Some(TileCategory::AllZero),
            2 => Some(TileCategory::AllOne),
            _ => None,
        }
    }
}

/// A tile's fixed-size byte payload. The coordinator treats the contents as
/// opaque worker output; only the length is an invariant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TilePayload(Vec<u8>);

impl TilePayload {
    /// Wrap an owned buffer. Panics if `bytes.len() != TILE_PAYLOAD_LEN`
    /// (a programmer error per spec.md §7 — callers must not construct a
    /// tile of the wrong size).
    pub fn new(bytes: Vec<u8>) -> Self {
        assert_eq!(
            bytes.len(),
            TILE_PAYLOAD_LEN,
            "tile payload must be exactly TILE_PAYLOAD_LEN bytes"
        );
        TilePayload(bytes)
    }

    /// A tile uniformly filled with `value`.
    pub fn uniform(value: u8) -> Self {
        TilePayload(vec![value; TILE_PAYLOAD_LEN])
    }

    pub fn category(&self) -> TileCategory {
        TileCategory::classify(&self.0)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for TilePayload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_uniform_and_regular_payloads() {
        assert_eq!(TileCategory::classify(&[0u8; 16]), TileCategory::AllZero);
        assert_eq!(TileCategory::classify(&[1u8; 16]), TileCategory::AllOne);
        let mut bytes = vec![1u8; 16];
        bytes[3] = 7;
        assert_eq!(TileCategory::classify(&bytes), TileCategory::Regular);
    }

    #[test]
    fn category_round_trips_through_u32() {
        for cat in [TileCategory::Regular, TileCategory::AllZero, TileCategory::AllOne] {
            assert_eq!(TileCategory::from_u32(cat.to_u32()), Some(cat));
        }
        assert_eq!(TileCategory::from_u32(3), None);
    }

    #[test]
    #[should_panic]
    fn new_rejects_wrong_length() {
        TilePayload::new(vec![0u8; 4]);
    }
}
