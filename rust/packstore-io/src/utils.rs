use std::ops::Range;

use crate::{ReadAt, SealingWrite};

/// Intersects a requested read range with an object of `len` bytes.
///
/// Returns `None` when nothing is left to read and rejects inverted ranges.
pub fn clip_read_range(range: Range<u64>, len: u64) -> std::io::Result<Option<Range<u64>>> {
    if range.end < range.start {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("inverted read range {}..{}", range.start, range.end),
        ));
    }
    let end = range.end.min(len);
    Ok((range.start < end).then_some(range.start..end))
}

/// Reads exactly `len` bytes at `pos`, failing with `UnexpectedEof` on a short read.
pub fn read_exact_at(reader: &dyn ReadAt, pos: u64, len: usize) -> std::io::Result<bytes::Bytes> {
    let end = pos.checked_add(len as u64).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("read of {len} bytes at {pos} overflows the address space"),
        )
    })?;
    let buf = reader.read_at(pos..end)?;
    if buf.len() != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short read at {pos}: expected {len} bytes, got {}", buf.len()),
        ));
    }
    Ok(buf)
}

/// Copies the entire content of `reader` into `writer` in slices of at most
/// `io_size` bytes. Returns the number of bytes copied.
///
/// The writer is not sealed.
pub fn copy_all(
    reader: &dyn ReadAt,
    writer: &mut dyn SealingWrite,
    io_size: usize,
) -> std::io::Result<u64> {
    let size = reader.size()?;
    let step = reader.storage_profile().clamp_io_size(io_size) as u64;
    let mut pos = 0u64;
    while pos < size {
        let end = (pos + step).min(size);
        let buf = read_exact_at(reader, pos, (end - pos) as usize)?;
        writer.write_all(&buf)?;
        pos = end;
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_all() {
        let src: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut dst = Vec::<u8>::new();
        let copied = copy_all(&src, &mut dst, 333).unwrap();
        assert_eq!(copied, 10_000);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_clip_read_range() {
        assert_eq!(clip_read_range(2..8, 5).unwrap(), Some(2..5));
        assert_eq!(clip_read_range(5..8, 5).unwrap(), None);
        assert_eq!(clip_read_range(3..3, 5).unwrap(), None);
        assert!(clip_read_range(4..3, 5).is_err());
    }

    #[test]
    fn test_read_exact_at_short() {
        let src = b"abcdef".to_vec();
        assert_eq!(read_exact_at(&src, 2, 3).unwrap().as_ref(), b"cde");
        let err = read_exact_at(&src, 4, 3).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
        let err = read_exact_at(&src, u64::MAX - 1, 4).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
