//! Per-container download completion flags.
//!
//! Stored as one `'0'`/`'1'` character per container, no separators and no
//! trailing newline, so the file length always equals the container count.
//! Every change is written to a sibling temp file and renamed into place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::ManifestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressBitmap {
    path: PathBuf,
    bits: Vec<bool>,
}

impl ProgressBitmap {
    /// Read the bitmap at `path`, or create an all-zero one of `count` bits.
    pub fn load_or_create<P: AsRef<Path>>(path: P, count: usize) -> Result<Self, ManifestError> {
        let path = path.as_ref().to_owned();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let bitmap = Self { path, bits: vec![false; count] };
                bitmap.persist()?;
                return Ok(bitmap);
            }
            Err(e) => return Err(e.into()),
        };

        if text.len() != count {
            return Err(ManifestError::invalid(&path, format!(
                "bitmap holds {} flags, expected {count}", text.len()
            )));
        }
        let bits = text
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(ManifestError::invalid(&path, format!("unexpected flag {other:?}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { path, bits })
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn len(&self) -> usize { self.bits.len() }
    pub fn is_empty(&self) -> bool { self.bits.is_empty() }

    pub fn is_set(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    /// Mark container `index` (0-based) staged and persist immediately.
    pub fn set(&mut self, index: usize) -> io::Result<()> {
        self.update(index, true)
    }

    /// Mark container `index` (0-based) pending and persist immediately.
    pub fn clear(&mut self, index: usize) -> io::Result<()> {
        self.update(index, false)
    }

    fn update(&mut self, index: usize, value: bool) -> io::Result<()> {
        let bit = self.bits.get_mut(index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no container {index} in bitmap"))
        })?;
        if *bit != value {
            *bit = value;
            self.persist()?;
        }
        Ok(())
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn all_set(&self) -> bool {
        self.bits.iter().all(|b| *b)
    }

    pub fn none_set(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    /// 0-based indices still waiting for retrieval.
    pub fn pending(&self) -> Vec<usize> {
        (0..self.bits.len()).filter(|&i| !self.bits[i]).collect()
    }

    pub fn render(&self) -> String {
        self.bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
    }

    pub fn persist(&self) -> io::Result<()> {
        let tmp = self.path.with_extension("bitmap.tmp");
        fs::write(&tmp, self.render())?;
        fs::rename(&tmp, &self.path)
    }

    /// Delete the bitmap file.  A file that is already gone is fine.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn created_all_zero_without_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bitmap");
        let bitmap = ProgressBitmap::load_or_create(&path, 5).unwrap();
        assert!(bitmap.none_set());
        assert_eq!(fs::read_to_string(&path).unwrap(), "00000");
    }

    #[test]
    fn set_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bitmap");
        let mut bitmap = ProgressBitmap::load_or_create(&path, 4).unwrap();
        bitmap.set(1).unwrap();
        bitmap.set(3).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0101");

        let reloaded = ProgressBitmap::load_or_create(&path, 4).unwrap();
        assert_eq!(reloaded.pending(), vec![0, 2]);
        assert_eq!(reloaded.count_set(), 2);
        assert!(!reloaded.all_set());
    }

    #[test]
    fn rejects_wrong_length_and_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bitmap");
        fs::write(&path, "011").unwrap();
        assert!(matches!(
            ProgressBitmap::load_or_create(&path, 4),
            Err(ManifestError::Invalid { .. })
        ));
        fs::write(&path, "01x1").unwrap();
        assert!(matches!(
            ProgressBitmap::load_or_create(&path, 4),
            Err(ManifestError::Invalid { .. })
        ));
    }

    #[test]
    fn out_of_range_set_fails() {
        let dir = TempDir::new().unwrap();
        let mut bitmap = ProgressBitmap::load_or_create(dir.path().join("b"), 1).unwrap();
        assert!(bitmap.set(1).is_err());
        bitmap.set(0).unwrap();
        assert!(bitmap.all_set());
        bitmap.remove().unwrap();
        bitmap.remove().unwrap();
    }
}
