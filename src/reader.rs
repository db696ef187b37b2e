//! One ordered byte stream over many staging files.
//!
//! Staging files are written independently and in whatever order their
//! containers finish, but decoding needs them back to back.  The reader walks
//! the list in order, keeping a byte cursor per file, and tops up short reads
//! from the following files so a fixed-size read only comes back short at the
//! true end of the stream.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct Source {
    path:   PathBuf,
    offset: u64,
}

pub struct SequentialMultiFileReader {
    sources: Vec<Source>,
    current: usize,
    open:    Option<File>,
}

impl SequentialMultiFileReader {
    /// `sources` pairs each file with the number of bytes already consumed
    /// from it.
    pub fn new(sources: Vec<(PathBuf, u64)>) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|(path, offset)| Source { path, offset })
                .collect(),
            current: 0,
            open:    None,
        }
    }

    /// Start every file from its beginning.
    pub fn from_paths<I: IntoIterator<Item = PathBuf>>(paths: I) -> Self {
        Self::new(paths.into_iter().map(|p| (p, 0)).collect())
    }

    /// Per-file cursor: bytes consumed so far from each source.
    pub fn offsets(&self) -> Vec<(&Path, u64)> {
        self.sources.iter().map(|s| (s.path.as_path(), s.offset)).collect()
    }

    /// Read up to `n` bytes.  Fewer than `n` only at end of stream.
    pub fn read_chunk(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let got = self.read(&mut out[filled..])?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        out.truncate(filled);
        Ok(out)
    }

    fn current_file(&mut self) -> io::Result<Option<&mut File>> {
        if self.open.is_none() {
            let Some(source) = self.sources.get(self.current) else {
                return Ok(None);
            };
            let mut file = File::open(&source.path)?;
            file.seek(SeekFrom::Start(source.offset))?;
            self.open = Some(file);
        }
        Ok(self.open.as_mut())
    }

    fn advance(&mut self) {
        self.open = None;
        self.current += 1;
    }
}

impl Read for SequentialMultiFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let got = match self.current_file()? {
                Some(file) => file.read(buf)?,
                None       => return Ok(0),
            };
            if got == 0 {
                // Exhausted (or zero-length); move on to the next file.
                self.advance();
                continue;
            }
            self.sources[self.current].offset += got as u64;
            return Ok(got);
        }
    }
}
