//! Snapshot files on disk.
//!
//! Format: magic `TMQS`, one version byte, the body length as a
//! little-endian u64, the MessagePack body, then a CRC32 of the body.
//! Files are written to a temporary sibling and renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::snapshot::BrokerSnapshot;
use crate::types::Timestamp;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

const SNAPSHOT_MAGIC: &[u8; 4] = b"TMQS";

const SNAPSHOT_VERSION: u8 = 1;

/// Header: magic + version + body length.
const HEADER_LEN: u64 = 4 + 1 + 8;

const CHECKSUM_LEN: u64 = 4;

/// Distinguishes temp files of saves running at the same time.
static SAVE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Debug)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(config.snapshot_path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `snapshot`, replacing any previous file.
    pub fn save(&self, snapshot: &BrokerSnapshot) -> Result<()> {
        let body = rmp_serde::to_vec(snapshot)?;
        let checksum = crc32fast::hash(&body);
        let temp_path = self.sibling(&format!(
            ".tmp.{}.{}",
            process::id(),
            SAVE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = write_framed(&temp_path, &body, checksum) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        fs::rename(&temp_path, &self.path)?;

        info!(
            path = %self.path.display(),
            queues = snapshot.queues.len(),
            routes = snapshot.routes.len(),
            messages = snapshot.message_count(),
            bytes = body.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Read the snapshot back. `None` if no file exists yet.
    pub fn load(&self) -> Result<Option<BrokerSnapshot>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(BrokerError::InvalidFormat("Invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(BrokerError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        reader.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);
        let expected_len = len.checked_add(HEADER_LEN + CHECKSUM_LEN);
        if expected_len != Some(file_len) {
            return Err(BrokerError::Corruption(format!(
                "Snapshot body length {} does not match file size {}",
                len, file_len
            )));
        }

        let body_len = usize::try_from(len).map_err(|_| {
            BrokerError::Corruption(format!("Snapshot body length {} too large", len))
        })?;
        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&body);
        if expected != got {
            return Err(BrokerError::ChecksumMismatch { expected, got });
        }

        let snapshot: BrokerSnapshot = rmp_serde::from_slice(&body)?;
        info!(
            path = %self.path.display(),
            queues = snapshot.queues.len(),
            messages = snapshot.message_count(),
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    /// Exclusive lock on `<path>.lock`, held while a save is in flight.
    fn lock(&self) -> Result<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.sibling(".lock"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| BrokerError::SnapshotInProgress)?;

        Ok(lock_file)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}

fn write_framed(path: &Path, body: &[u8], checksum: u32) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(SNAPSHOT_MAGIC)?;
    writer.write_all(&[SNAPSHOT_VERSION])?;
    writer.write_all(&(body.len() as u64).to_le_bytes())?;
    writer.write_all(body)?;
    writer.write_all(&checksum.to_le_bytes())?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Writes snapshots on a background thread.
///
/// The broker captures an owned [`BrokerSnapshot`] and keeps serving while
/// the file is written. Only one save runs at a time, within this process
/// and across processes sharing the snapshot path.
pub struct BackgroundSaver {
    file: Arc<SnapshotFile>,
    job: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl BackgroundSaver {
    pub fn new(file: SnapshotFile) -> Self {
        Self {
            file: Arc::new(file),
            job: Mutex::new(None),
        }
    }

    pub fn file(&self) -> &SnapshotFile {
        &self.file
    }

    /// Start writing `snapshot`. Fails with
    /// [`BrokerError::SnapshotInProgress`] while a previous save runs.
    pub fn start(&self, snapshot: BrokerSnapshot) -> Result<()> {
        let mut job = self.job.lock();
        if job.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(BrokerError::SnapshotInProgress);
        }
        if let Some(finished) = job.take() {
            report(finished);
        }

        let lock = self.file.lock()?;
        let file = Arc::clone(&self.file);
        let handle = thread::Builder::new()
            .name("tidemq-snapshot".into())
            .spawn(move || {
                let _lock = lock;
                file.save(&snapshot)
            })?;

        *job = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.job
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Block until the current save finishes and return its outcome.
    /// `Ok(false)` if there was nothing to wait for.
    pub fn wait(&self) -> Result<bool> {
        let Some(handle) = self.job.lock().take() else {
            return Ok(false);
        };
        handle
            .join()
            .map_err(|_| BrokerError::Corruption("Snapshot thread panicked".into()))??;
        Ok(true)
    }
}

impl BackgroundSaver {
    /// Start a periodic save when `schedule` says one is due and no save is
    /// running. The snapshot is only captured when a save actually starts.
    ///
    /// Returns whether a save was started. A failed start still counts as
    /// an attempt, so the next one waits a full interval.
    pub fn save_if_due<F>(
        &self,
        schedule: &mut SaveSchedule,
        now: Timestamp,
        capture: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> BrokerSnapshot,
    {
        if !schedule.is_due(now) || self.is_running() {
            return Ok(false);
        }

        schedule.mark_saved(now);
        info!(path = %self.file.path().display(), "Periodic snapshot");
        self.start(capture())?;
        Ok(true)
    }
}

/// When the next periodic snapshot is due.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaveSchedule {
    interval_ms: u64,
    last_save: Timestamp,
}

impl SaveSchedule {
    /// `interval_secs == 0` disables periodic saves.
    pub fn new(interval_secs: u64, now: Timestamp) -> Self {
        Self {
            interval_ms: interval_secs.saturating_mul(1000),
            last_save: now,
        }
    }

    pub fn from_config(config: &BrokerConfig, now: Timestamp) -> Self {
        Self::new(config.save_interval_secs, now)
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_ms > 0
    }

    /// Earliest time the next save may start.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.is_enabled()
            .then(|| self.last_save.saturating_add_millis(self.interval_ms))
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_due().is_some_and(|due| now > due)
    }

    pub fn mark_saved(&mut self, now: Timestamp) {
        self.last_save = now;
    }
}

fn report(handle: JoinHandle<Result<()>>) {
    match handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Background snapshot failed"),
        Err(_) => warn!("Background snapshot thread panicked"),
    }
}
