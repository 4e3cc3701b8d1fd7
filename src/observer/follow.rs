//! Follows a file as it is appended to, reopening it when it is rotated
//! or truncated.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    End,
}

/// One complete line and the moment it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    pub text: String,
    pub time: DateTime<Utc>,
}

enum FileState {
    Unchanged,
    Replaced,
    Truncated,
    Removed,
}

pub struct Follower {
    path: PathBuf,
    reader: BufReader<File>,
    identity: Option<u64>,
    position: u64,
    pending: Vec<u8>,
    poll_interval: Duration,
}

impl Follower {
    pub async fn open(path: &Path, start: StartPosition, poll_interval: Duration) -> io::Result<Self> {
        let mut file = File::open(path).await?;
        let identity = file_identity(&file.metadata().await?);
        let position = match start {
            StartPosition::Beginning => 0,
            StartPosition::End => file.seek(SeekFrom::End(0)).await?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            identity,
            position,
            pending: Vec::new(),
            poll_interval,
        })
    }

    /// Waits for the next complete line. Returns `None` once the file and
    /// its directory are gone.
    pub async fn next_line(&mut self) -> io::Result<Option<TailLine>> {
        loop {
            if let Some(line) = self.read_line().await? {
                return Ok(Some(line));
            }

            match self.state().await? {
                FileState::Unchanged => tokio::time::sleep(self.poll_interval).await,
                FileState::Replaced => {
                    // Drain what was written to the old file before the swap.
                    if let Some(line) = self.read_line().await? {
                        return Ok(Some(line));
                    }
                    if !self.reopen().await? {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
                FileState::Truncated => {
                    if !self.reopen().await? {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
                FileState::Removed => return Ok(None),
            }
        }
    }

    async fn read_line(&mut self) -> io::Result<Option<TailLine>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        self.position += read as u64;
        if self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }

        let mut bytes = std::mem::take(&mut self.pending);
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        Ok(Some(TailLine {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            time: Utc::now(),
        }))
    }

    async fn state(&self) -> io::Result<FileState> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(if self.directory_removed().await {
                    FileState::Removed
                } else {
                    FileState::Unchanged
                });
            }
            Err(e) => return Err(e),
        };

        if file_identity(&metadata) != self.identity {
            Ok(FileState::Replaced)
        } else if metadata.len() < self.position {
            Ok(FileState::Truncated)
        } else {
            Ok(FileState::Unchanged)
        }
    }

    async fn directory_removed(&self) -> bool {
        match self.path.parent() {
            Some(dir) => matches!(
                tokio::fs::metadata(dir).await,
                Err(e) if e.kind() == io::ErrorKind::NotFound
            ),
            None => false,
        }
    }

    /// Returns false if the file vanished between the check and the open.
    async fn reopen(&mut self) -> io::Result<bool> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        debug!("Reopening {:?}", self.path);
        self.identity = file_identity(&file.metadata().await?);
        self.reader = BufReader::new(file);
        self.position = 0;
        self.pending.clear();
        Ok(true)
    }
}

#[cfg(unix)]
fn file_identity(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_identity(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}
