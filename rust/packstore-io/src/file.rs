//! Local file backends for segment data, offsets and patch files.

use std::{
    fs::File,
    io::{BufWriter, Write},
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::{Bytes, BytesMut};

use crate::{ReadAt, SealingWrite, StorageProfile, utils::clip_read_range};

const FILE_READ_PROFILE: StorageProfile = StorageProfile {
    min_io_size: 16 * 1024,
    max_io_size: 1024 * 1024,
};

const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Positional reader over an immutable local file.
///
/// The file length is captured at open time. Segment files are written once
/// and sealed before anyone reads them, so the length never changes afterwards.
#[derive(Clone)]
pub struct FileReader {
    file: Arc<File>,
    len: u64,
}

impl FileReader {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<FileReader> {
        let file = File::open(path)?;
        FileReader::from_file(file)
    }

    pub fn from_file(file: File) -> std::io::Result<FileReader> {
        let len = file.metadata()?.len();
        Ok(FileReader {
            file: Arc::new(file),
            len,
        })
    }
}

impl ReadAt for FileReader {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.len)
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        let Some(range) = clip_read_range(range, self.len)? else {
            return Ok(Bytes::new());
        };
        let mut buf = BytesMut::zeroed((range.end - range.start) as usize);
        file_read_at_exact(&self.file, range.start, &mut buf)?;
        Ok(buf.freeze())
    }

    fn storage_profile(&self) -> StorageProfile {
        FILE_READ_PROFILE
    }
}

/// Append-only writer over a freshly created local file.
///
/// Creation fails if the file already exists. Nothing written is durable until
/// `seal()` flushes and syncs the file; after that the writer rejects further
/// writes.
pub struct FileWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    written: u64,
}

impl FileWriter {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<FileWriter> {
        let path = path.as_ref().to_path_buf();
        let file = File::create_new(&path)?;
        Ok(FileWriter {
            path,
            out: Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn sealed_error(&self) -> std::io::Error {
        std::io::Error::other(format!("{} is already sealed", self.path.display()))
    }
}

impl SealingWrite for FileWriter {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Err(self.sealed_error());
        };
        out.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(())
    }

    fn seal(&mut self) -> std::io::Result<()> {
        let Some(out) = self.out.take() else {
            return Err(self.sealed_error());
        };
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }

    fn storage_profile(&self) -> StorageProfile {
        StorageProfile {
            min_io_size: WRITE_BUFFER_SIZE,
            ..Default::default()
        }
    }
}

/// Fills `buf` from `file` starting at `pos`, failing with `UnexpectedEof`
/// when the file ends first.
#[cfg(unix)]
pub fn file_read_at_exact(file: &File, pos: u64, buf: &mut [u8]) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, pos)
}

#[cfg(windows)]
pub fn file_read_at_exact(file: &File, pos: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    let mut filled = 0;
    while filled < buf.len() {
        let n = file.seek_read(&mut buf[filled..], pos + filled as u64)?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        filled += n;
    }
    Ok(())
}
