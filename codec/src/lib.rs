// Tile payload codec: encode/decode the fixed-size tile payload to a
// self-describing byte stream, always choosing the shorter of the known
// encodings.

use thiserror::Error;
use tilecoord_core::{TilePayload, TILE_PAYLOAD_LEN};

const RAW_CODE: u8 = 0x00;
const RLE_CODE: u8 = 0x01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown encoding byte {0:#04x}")]
    BadEncoding(u8),
    #[error("stream ended before the payload was fully decoded")]
    TruncatedStream,
    #[error("run lengths summed to more than TILE_PAYLOAD_LEN")]
    LengthMismatch,
}

/// Encode a tile payload, choosing the shortest of the known encodings.
/// Ties are broken by encoding-code ascending. Infallible: every payload
/// encodes under Raw at worst.
pub fn encode(tile: &TilePayload) -> Vec<u8> {
    let raw = encode_raw(tile);
    let rle = encode_rle(tile);

    // Raw's code (0x00) is already lower, so on a tie prefer it by checking
    // `<` rather than `<=` against RLE.
    if rle.len() < raw.len() {
        rle
    } else {
        raw
    }
}

/// Decode a byte stream produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<TilePayload, CodecError> {
    let (&code, rest) = bytes.split_first().ok_or(CodecError::TruncatedStream)?;
    match code {
        RAW_CODE => decode_raw(rest),
        RLE_CODE => decode_rle(rest),
        other => Err(CodecError::BadEncoding(other)),
    }
}

fn encode_raw(tile: &TilePayload) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + TILE_PAYLOAD_LEN);
    out.push(RAW_CODE);
    out.extend_from_slice(tile);
    out
}

fn decode_raw(rest: &[u8]) -> Result<TilePayload, CodecError> {
    if rest.len() != TILE_PAYLOAD_LEN {
        return Err(CodecError::TruncatedStream);
    }
    Ok(TilePayload::new(rest.to_vec()))
}

fn encode_rle(tile: &TilePayload) -> Vec<u8> {
    let mut out = vec![RLE_CODE];

    let mut iter = tile.iter().copied();
    let mut run_value = match iter.next() {
        Some(b) => b,
        None => return out,
    };
    let mut run_len: u32 = 1;

    for byte in iter {
        if byte == run_value {
            run_len += 1;
        } else {
            out.extend_from_slice(&run_len.to_le_bytes());
            out.push(run_value);
            run_value = byte;
            run_len = 1;
        }
    }
    out.extend_from_slice(&run_len.to_le_bytes());
    out.push(run_value);
    out
}

fn decode_rle(rest: &[u8]) -> Result<TilePayload, CodecError> {
    let mut out = Vec::with_capacity(TILE_PAYLOAD_LEN);
    let mut cursor = rest;

    while out.len() < TILE_PAYLOAD_LEN {
        if cursor.len() < 5 {
            return Err(CodecError::TruncatedStream);
        }
        let len = u32::from_le_bytes(cursor[0..4].try_into().unwrap());
        let value = cursor[4];
        cursor = &cursor[5..];

        if len == 0 {
            return Err(CodecError::BadEncoding(RLE_CODE));
        }
        if out.len() + len as usize > TILE_PAYLOAD_LEN {
            return Err(CodecError::LengthMismatch);
        }
        out.resize(out.len() + len as usize, value);
    }

    if !cursor.is_empty() {
        return Err(CodecError::LengthMismatch);
    }

    Ok(TilePayload::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: u8) -> TilePayload {
        TilePayload::uniform(value)
    }

    #[test]
    fn round_trips_uniform_payload() {
        let tile = uniform(0x01);
        let encoded = encode(&tile);
        assert_eq!(encoded[0], RLE_CODE);
        assert_eq!(decode(&encoded).unwrap(), tile);
    }

    #[test]
    fn round_trips_high_entropy_payload() {
        let bytes: Vec<u8> = (0..TILE_PAYLOAD_LEN).map(|i| (i % 251) as u8).collect();
        let tile = TilePayload::new(bytes);
        let encoded = encode(&tile);
        assert_eq!(encoded[0], RAW_CODE, "high-entropy payload should stay Raw");
        assert_eq!(decode(&encoded).unwrap(), tile);
    }

    #[test]
    fn uniform_tile_shrinks_to_a_single_run() {
        let tile = uniform(0x01);
        let encoded = encode(&tile);
        // selector byte + 4-byte length + 1-byte value
        assert_eq!(encoded.len(), 6);
        assert_eq!(encoded, vec![RLE_CODE, 0x00, 0x00, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn decode_rejects_unknown_encoding_byte() {
        assert_eq!(decode(&[0xFF]), Err(CodecError::BadEncoding(0xFF)));
    }

    #[test]
    fn decode_rejects_truncated_raw_stream() {
        assert_eq!(decode(&[RAW_CODE, 1, 2, 3]), Err(CodecError::TruncatedStream));
    }

    #[test]
    fn decode_rejects_zero_length_run() {
        let mut bytes = vec![RLE_CODE];
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(0x01);
        assert_eq!(decode(&bytes), Err(CodecError::BadEncoding(RLE_CODE)));
    }

    #[test]
    fn decode_rejects_runs_that_overshoot() {
        let mut bytes = vec![RLE_CODE];
        bytes.extend_from_slice(&(TILE_PAYLOAD_LEN as u32 + 1).to_le_bytes());
        bytes.push(0x01);
        assert_eq!(decode(&bytes), Err(CodecError::LengthMismatch));
    }

    #[test]
    fn encoder_never_exceeds_raw_plus_one_byte() {
        let bytes: Vec<u8> = (0..TILE_PAYLOAD_LEN).map(|i| (i % 251) as u8).collect();
        let tile = TilePayload::new(bytes);
        let encoded = encode(&tile);
        assert!(encoded.len() <= TILE_PAYLOAD_LEN + 1);
    }
}
