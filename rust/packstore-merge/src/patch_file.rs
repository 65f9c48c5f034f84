//! Patch file format.
//!
//! ```text
//! [doc_id: u32 LE | len: u32 LE | value bytes]*  [patch_count: u32 LE | max_patch_len: u32 LE]
//! ```
//! Records are ordered by non-decreasing document id. A document may appear more
//! than once; later records supersede earlier ones.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use packstore_attribute::DocId;
use packstore_common::{Result, error::Error};
use packstore_io::{ReadAt, SealingWrite, utils::read_exact_at};

pub const PATCH_RECORD_HEADER_SIZE: usize = 8;
pub const PATCH_FOOTER_SIZE: usize = 8;

/// Trailer of a patch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchFooter {
    pub patch_count: u32,
    /// Length of the longest record value, used to pre-size scratch buffers.
    pub max_patch_len: u32,
}

impl PatchFooter {
    pub fn to_bytes(&self) -> [u8; PATCH_FOOTER_SIZE] {
        let mut buf = [0u8; PATCH_FOOTER_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.patch_count);
        LittleEndian::write_u32(&mut buf[4..8], self.max_patch_len);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<PatchFooter> {
        let buf = buf.get(..PATCH_FOOTER_SIZE).ok_or_else(|| {
            Error::invalid_format("patch footer", format!("truncated: {} bytes", buf.len()))
        })?;
        Ok(PatchFooter {
            patch_count: LittleEndian::read_u32(&buf[0..4]),
            max_patch_len: LittleEndian::read_u32(&buf[4..8]),
        })
    }

    /// Reads only the footer of a patch file.
    pub fn read_from(reader: &dyn ReadAt) -> Result<PatchFooter> {
        let size = reader.size().map_err(|e| Error::io("patch file", e))?;
        if size < PATCH_FOOTER_SIZE as u64 {
            return Err(Error::invalid_format(
                "patch file",
                format!("file of {size} bytes has no footer"),
            ));
        }
        let buf = read_exact_at(reader, size - PATCH_FOOTER_SIZE as u64, PATCH_FOOTER_SIZE)
            .map_err(|e| Error::io("patch footer", e))?;
        PatchFooter::from_bytes(&buf)
    }
}

/// One patch record. `value` shares the buffer of the file it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub doc_id: DocId,
    pub value: Bytes,
}

/// Writes a patch file sequentially.
pub struct PatchFileWriter<W> {
    inner: W,
    last_doc: Option<DocId>,
    footer: PatchFooter,
}

impl<W: SealingWrite> PatchFileWriter<W> {
    pub fn new(inner: W) -> PatchFileWriter<W> {
        PatchFileWriter {
            inner,
            last_doc: None,
            footer: PatchFooter::default(),
        }
    }

    pub fn write(&mut self, doc_id: DocId, value: &[u8]) -> Result<()> {
        if self.last_doc.is_some_and(|last| doc_id < last) {
            return Err(Error::invalid_arg(
                "doc_id",
                format!(
                    "patch for document {doc_id} follows document {}",
                    self.last_doc.unwrap_or_default()
                ),
            ));
        }
        let len = u32::try_from(value.len())
            .map_err(|_| Error::capacity("patch value", value.len() as u64, u32::MAX as u64))?;
        let count = self.footer.patch_count.checked_add(1).ok_or_else(|| {
            Error::capacity("patch count", u32::MAX as u64 + 1, u32::MAX as u64)
        })?;

        let mut header = [0u8; PATCH_RECORD_HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], doc_id);
        LittleEndian::write_u32(&mut header[4..8], len);
        self.inner
            .write_all(&header)
            .map_err(|e| Error::io("patch record", e))?;
        self.inner
            .write_all(value)
            .map_err(|e| Error::io("patch record", e))?;

        self.last_doc = Some(doc_id);
        self.footer.patch_count = count;
        self.footer.max_patch_len = self.footer.max_patch_len.max(len);
        Ok(())
    }

    pub fn footer(&self) -> PatchFooter {
        self.footer
    }

    /// Writes the footer and seals the sink.
    pub fn finish(mut self) -> Result<PatchFooter> {
        self.inner
            .write_all(&self.footer.to_bytes())
            .map_err(|e| Error::io("patch footer", e))?;
        self.inner.seal().map_err(|e| Error::io("patch file", e))?;
        Ok(self.footer)
    }
}

/// A fully loaded and validated patch file.
#[derive(Debug, Clone)]
pub struct PatchFileReader {
    footer: PatchFooter,
    records: Vec<PatchRecord>,
}

impl PatchFileReader {
    pub fn open(reader: &dyn ReadAt) -> Result<PatchFileReader> {
        let size = reader.size().map_err(|e| Error::io("patch file", e))?;
        let buf = read_exact_at(reader, 0, size as usize).map_err(|e| Error::io("patch file", e))?;
        Self::from_bytes(buf)
    }

    /// Parses a patch file image, checking the records against the footer.
    pub fn from_bytes(buf: Bytes) -> Result<PatchFileReader> {
        if buf.len() < PATCH_FOOTER_SIZE {
            return Err(Error::invalid_format(
                "patch file",
                format!("file of {} bytes has no footer", buf.len()),
            ));
        }
        let body_len = buf.len() - PATCH_FOOTER_SIZE;
        let footer = PatchFooter::from_bytes(&buf[body_len..])?;

        let mut records =
            Vec::with_capacity((footer.patch_count as usize).min(body_len / PATCH_RECORD_HEADER_SIZE));
        let mut max_patch_len = 0;
        let mut pos = 0;
        while pos < body_len {
            let header = buf
                .get(pos..pos + PATCH_RECORD_HEADER_SIZE)
                .filter(|_| pos + PATCH_RECORD_HEADER_SIZE <= body_len)
                .ok_or_else(|| corrupt(pos, "truncated record header"))?;
            let doc_id = LittleEndian::read_u32(&header[0..4]);
            let len = LittleEndian::read_u32(&header[4..8]);
            let start = pos + PATCH_RECORD_HEADER_SIZE;
            let end = start + len as usize;
            if end > body_len {
                return Err(corrupt(pos, "truncated record value"));
            }
            if records.last().is_some_and(|r: &PatchRecord| doc_id < r.doc_id) {
                return Err(corrupt(pos, "records out of order"));
            }
            max_patch_len = max_patch_len.max(len);
            records.push(PatchRecord {
                doc_id,
                value: buf.slice(start..end),
            });
            pos = end;
        }

        if records.len() != footer.patch_count as usize || max_patch_len != footer.max_patch_len {
            return Err(Error::invalid_format(
                "patch file",
                format!(
                    "footer {footer:?} does not match {} records with max length {max_patch_len}",
                    records.len()
                ),
            ));
        }
        Ok(PatchFileReader { footer, records })
    }

    pub fn footer(&self) -> PatchFooter {
        self.footer
    }

    pub fn records(&self) -> &[PatchRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<PatchRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn corrupt(pos: usize, message: &str) -> Error {
    Error::invalid_format("patch file", format!("{message} at {pos}"))
}
