//! Size-rotated append-only file.
//!
//! When a write would push the active file past `max_size`, the file is
//! renamed to `<stem>-<timestamp>.<ext>` and a fresh file is opened at the
//! original path. Backups beyond `max_backups` or older than `max_age` are
//! removed after each rotation. Backups are optionally gzip-compressed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

/// Timestamp format embedded in backup names. Sorts lexically.
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Rotation and retention limits. Zero values mean "no limit".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the active file would exceed this many bytes.
    pub max_size: u64,
    /// Keep at most this many backups.
    pub max_backups: usize,
    /// Remove backups older than this.
    pub max_age: Option<Duration>,
    /// Gzip backups after rotation.
    pub compress: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_size: 200 * 1024 * 1024,
            max_backups: 100,
            max_age: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            compress: false,
        }
    }
}

/// An append-only file that rotates by size.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    policy: RotationPolicy,
    file: Option<File>,
    size: u64,
}

impl RotatingFile {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>, policy: RotationPolicy) -> io::Result<Self> {
        let mut this = Self {
            path: path.into(),
            policy,
            file: None,
            size: 0,
        };
        this.reopen()?;
        Ok(this)
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the active file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append `buf`, rotating first if it would overflow the size limit.
    ///
    /// A buffer larger than the limit is still written, alone, to a fresh
    /// file. After a failed write the file is reopened on the next call.
    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.file.is_none() {
            self.reopen()?;
        }
        let len = buf.len() as u64;
        if self.policy.max_size > 0 && self.size > 0 && self.size + len > self.policy.max_size {
            self.rotate()?;
        }
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::other("file not open"));
        };
        match file.write_all(buf) {
            Ok(()) => {
                self.size += len;
                Ok(())
            }
            Err(e) => {
                self.file = None;
                Err(e)
            }
        }
    }

    /// Move the active file to a backup and start a new one.
    pub fn rotate(&mut self) -> io::Result<()> {
        self.close()?;
        if self.path.exists() {
            let backup = self.backup_path();
            fs::rename(&self.path, &backup)?;
            debug!(from = %self.path.display(), to = %backup.display(), "rotated log file");
            if self.policy.compress {
                if let Err(e) = compress(&backup) {
                    warn!(file = %backup.display(), error = %e, "failed to compress backup");
                }
            }
        }
        self.reopen()?;
        self.prune();
        Ok(())
    }

    /// Flush and close the active file. A later write reopens it.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn reopen(&mut self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn stem_and_ext(&self) -> (String, String) {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        (stem, ext)
    }

    fn backup_path(&self) -> PathBuf {
        let (stem, ext) = self.stem_and_ext();
        let stamp = Utc::now().format(BACKUP_TIME_FORMAT).to_string();
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut n = 0u32;
        loop {
            let name = match (ext.is_empty(), n) {
                (true, 0) => format!("{stem}-{stamp}"),
                (true, _) => format!("{stem}-{stamp}.{n}"),
                (false, 0) => format!("{stem}-{stamp}.{ext}"),
                (false, _) => format!("{stem}-{stamp}.{n}.{ext}"),
            };
            let candidate = dir.join(name);
            if !candidate.exists() && !gz_path(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Backups of this file, newest first.
    pub fn backups(&self) -> Vec<PathBuf> {
        let (stem, _) = self.stem_and_ext();
        let prefix = format!("{stem}-");
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p != &self.path
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();
        backups.sort();
        backups.reverse();
        backups
    }

    fn prune(&self) {
        let now = SystemTime::now();
        for (idx, backup) in self.backups().into_iter().enumerate() {
            let over_count = self.policy.max_backups > 0 && idx >= self.policy.max_backups;
            let too_old = self.policy.max_age.is_some_and(|max_age| {
                fs::metadata(&backup)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age > max_age)
            });
            if over_count || too_old {
                if let Err(e) = fs::remove_file(&backup) {
                    warn!(file = %backup.display(), error = %e, "failed to remove old backup");
                }
            }
        }
    }
}

impl Drop for RotatingFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

fn compress(path: &Path) -> io::Result<()> {
    let target = gz_path(path);
    let mut input = File::open(path)?;
    let output = File::create(&target)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    let _ = io::copy(&mut input, &mut encoder)?;
    let _ = encoder.finish()?;
    fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn policy(max_size: u64, max_backups: usize) -> RotationPolicy {
        RotationPolicy {
            max_size,
            max_backups,
            max_age: None,
            compress: false,
        }
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c/x.jsonl");
        let file = RotatingFile::open(&path, policy(0, 0)).unwrap();
        assert!(path.exists());
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        fs::write(&path, b"old\n").unwrap();
        let mut file = RotatingFile::open(&path, policy(0, 0)).unwrap();
        assert_eq!(file.size(), 4);
        file.write_all(b"new\n").unwrap();
        drop(file);
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn rotates_when_size_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        let mut file = RotatingFile::open(&path, policy(10, 0)).unwrap();
        file.write_all(b"12345\n").unwrap();
        file.write_all(b"67890\n").unwrap();
        drop(file);

        assert_eq!(fs::read_to_string(&path).unwrap(), "67890\n");
        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n != "x.jsonl")
            .collect();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].starts_with("x-"));
        assert!(backups[0].ends_with(".jsonl"));
    }

    #[test]
    fn oversized_write_goes_to_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        let mut file = RotatingFile::open(&path, policy(4, 0)).unwrap();
        file.write_all(b"0123456789\n").unwrap();
        assert_eq!(file.size(), 11);
        file.write_all(b"a\n").unwrap();
        assert_eq!(file.size(), 2);
    }

    #[test]
    fn zero_max_size_never_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        let mut file = RotatingFile::open(&path, policy(0, 0)).unwrap();
        for _ in 0..100 {
            file.write_all(b"0123456789\n").unwrap();
        }
        assert!(file.backups().is_empty());
        assert_eq!(file.size(), 1100);
    }

    #[test]
    fn prunes_excess_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        let mut file = RotatingFile::open(&path, policy(0, 2)).unwrap();
        for i in 0..5 {
            file.write_all(format!("{i}\n").as_bytes()).unwrap();
            file.rotate().unwrap();
        }
        assert_eq!(file.backups().len(), 2);
    }

    #[test]
    fn backups_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        let mut file = RotatingFile::open(&path, policy(0, 0)).unwrap();
        file.write_all(b"first\n").unwrap();
        file.rotate().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        file.write_all(b"second\n").unwrap();
        file.rotate().unwrap();
        let backups = file.backups();
        assert_eq!(backups.len(), 2);
        assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "second\n");
        assert_eq!(fs::read_to_string(&backups[1]).unwrap(), "first\n");
    }

    #[test]
    fn compressed_backup_is_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        let mut file = RotatingFile::open(
            &path,
            RotationPolicy {
                compress: true,
                ..policy(0, 0)
            },
        )
        .unwrap();
        file.write_all(b"{\"a\":1}\n").unwrap();
        file.rotate().unwrap();

        let backups = file.backups();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].to_string_lossy().ends_with(".jsonl.gz"));

        let mut decoder = flate2::read::GzDecoder::new(File::open(&backups[0]).unwrap());
        let mut out = String::new();
        let _ = decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, "{\"a\":1}\n");
    }

    #[test]
    fn writes_resume_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        let mut file = RotatingFile::open(&path, policy(0, 0)).unwrap();
        file.write_all(b"a\n").unwrap();
        file.close().unwrap();
        file.write_all(b"b\n").unwrap();
        drop(file);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
    }
}
