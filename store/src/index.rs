use std::io::{self, Read, Write};

use tilecoord_core::{Coord, IndexEntry, TileCategory};

use crate::error::StoreError;

/// Read one index record from `r`. Returns `Ok(None)` on a clean end of
/// file (no bytes of a new record available) and `Err(CorruptIndex)` if the
/// stream ends partway through a record.
pub(crate) fn read_record<R: Read>(r: &mut R) -> Result<Option<IndexEntry>, StoreError> {
    let mut first_byte = [0u8; 1];
    let n = r.read(&mut first_byte)?;
    if n == 0 {
        return Ok(None);
    }

    let mut rest = [0u8; 15];
    r.read_exact(&mut rest).map_err(|_| StoreError::CorruptIndex)?;

    let mut header = [0u8; 16];
    header[0] = first_byte[0];
    header[1..].copy_from_slice(&rest);

    let level = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let i_real = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let i_imag = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let category_raw = u32::from_le_bytes(header[12..16].try_into().unwrap());
    let category = TileCategory::from_u32(category_raw).ok_or(StoreError::CorruptIndex)?;
    let coord = Coord::new(level, i_real, i_imag);

    let filename = if category == TileCategory::Regular {
        let mut len_bytes = [0u8; 4];
        r.read_exact(&mut len_bytes).map_err(|_| StoreError::CorruptIndex)?;
        let name_len = i32::from_le_bytes(len_bytes);
        if name_len < 0 {
            return Err(StoreError::CorruptIndex);
        }
        let mut name_bytes = vec![0u8; name_len as usize];
        r.read_exact(&mut name_bytes).map_err(|_| StoreError::CorruptIndex)?;
        let name = String::from_utf8(name_bytes).map_err(|_| StoreError::CorruptIndex)?;
        Some(name)
    } else {
        None
    };

    Ok(Some(IndexEntry::new(coord, category, filename)))
}

/// Append one index record to `w`. Index records are never rewritten.
pub(crate) fn write_record<W: Write>(w: &mut W, entry: &IndexEntry) -> io::Result<()> {
    w.write_all(&entry.coord.level.to_le_bytes())?;
    w.write_all(&entry.coord.i_real.to_le_bytes())?;
    w.write_all(&entry.coord.i_imag.to_le_bytes())?;
    w.write_all(&entry.category.to_u32().to_le_bytes())?;

    if entry.category == TileCategory::Regular {
        let name = entry
            .filename
            .as_deref()
            .expect("Regular index entries always carry a filename");
        w.write_all(&(name.len() as i32).to_le_bytes())?;
        w.write_all(name.as_bytes())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_regular_entry() {
        let entry = IndexEntry::new(
            Coord::new(4, 1, 2),
            TileCategory::Regular,
            Some("4;1;2".to_string()),
        );
        let mut buf = Vec::new();
        write_record(&mut buf, &entry).unwrap();
        let mut cursor = buf.as_slice();
        let read_back = read_record(&mut cursor).unwrap().unwrap();
        assert_eq!(read_back, entry);
        assert!(read_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn round_trips_a_uniform_entry_with_no_filename() {
        let entry = IndexEntry::new(Coord::new(2, 0, 0), TileCategory::AllZero, None);
        let mut buf = Vec::new();
        write_record(&mut buf, &entry).unwrap();
        let mut cursor = buf.as_slice();
        assert_eq!(read_record(&mut cursor).unwrap().unwrap(), entry);
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let mut buf = vec![0u8; 10];
        let mut cursor = buf.as_mut_slice() as &[u8];
        assert!(matches!(read_record(&mut cursor), Err(StoreError::CorruptIndex)));
    }

    #[test]
    fn empty_stream_is_a_clean_eof() {
        let mut cursor: &[u8] = &[];
        assert!(read_record(&mut cursor).unwrap().is_none());
    }
}
