use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use fflab_core::{FrameRecord, TrialRecord};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StoreError;

/// Destination for finished trial rows and their frames.
pub trait TrialStore {
    fn open(&mut self) -> Result<(), StoreError>;

    fn save_trial(&mut self, record: &TrialRecord) -> Result<(), StoreError>;

    fn save_frames(
        &mut self,
        trial: usize,
        attempt: u32,
        frames: &[FrameRecord],
    ) -> Result<(), StoreError>;

    fn close(&mut self) -> Result<(), StoreError>;
}

/// One JSON object per line: trial rows in the data file, frames in a
/// companion `<stem>.frames.jsonl` next to it.
#[derive(Debug)]
pub struct JsonLinesStore {
    trials_path: PathBuf,
    frames_path: PathBuf,
    trials: Option<BufWriter<File>>,
    frames: Option<BufWriter<File>>,
}

#[derive(Serialize)]
struct FrameLine<'a> {
    trial: usize,
    attempt: u32,
    row: usize,
    #[serde(flatten)]
    frame: &'a FrameRecord,
}

impl JsonLinesStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let trials_path = path.as_ref().to_path_buf();
        let stem = trials_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trials".to_string());
        let frames_path = trials_path.with_file_name(format!("{stem}.frames.jsonl"));
        Self {
            trials_path,
            frames_path,
            trials: None,
            frames: None,
        }
    }

    pub fn trials_path(&self) -> &Path {
        &self.trials_path
    }

    pub fn frames_path(&self) -> &Path {
        &self.frames_path
    }

    fn writers(&mut self) -> Result<(&mut BufWriter<File>, &mut BufWriter<File>), StoreError> {
        if self.trials.is_none() || self.frames.is_none() {
            self.open()?;
        }
        match (self.trials.as_mut(), self.frames.as_mut()) {
            (Some(t), Some(f)) => Ok((t, f)),
            _ => Err(StoreError::Io(std::io::Error::other("data file not open"))),
        }
    }
}

impl TrialStore for JsonLinesStore {
    fn open(&mut self) -> Result<(), StoreError> {
        if self.trials.is_some() {
            return Ok(());
        }
        if let Some(dir) = self.trials_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        self.trials = Some(BufWriter::new(File::create(&self.trials_path)?));
        self.frames = Some(BufWriter::new(File::create(&self.frames_path)?));
        info!(path = %self.trials_path.display(), "data file opened");
        Ok(())
    }

    fn save_trial(&mut self, record: &TrialRecord) -> Result<(), StoreError> {
        let (trials, _) = self.writers()?;
        serde_json::to_writer(&mut *trials, record)?;
        trials.write_all(b"\n")?;
        trials.flush()?;
        debug!(trial = record.trial, attempt = record.attempt, "trial row saved");
        Ok(())
    }

    fn save_frames(
        &mut self,
        trial: usize,
        attempt: u32,
        frames: &[FrameRecord],
    ) -> Result<(), StoreError> {
        let (_, out) = self.writers()?;
        for (row, frame) in frames.iter().enumerate() {
            serde_json::to_writer(
                &mut *out,
                &FrameLine {
                    trial,
                    attempt,
                    row,
                    frame,
                },
            )?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if let Some(mut t) = self.trials.take() {
            t.flush()?;
        }
        if let Some(mut f) = self.frames.take() {
            f.flush()?;
        }
        Ok(())
    }
}

/// Keeps everything in memory. `fail_after` makes the store refuse trial
/// rows once that many have been saved.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub records: Vec<TrialRecord>,
    pub frame_counts: Vec<(usize, u32, usize)>,
    pub fail_after: Option<usize>,
    pub opened: bool,
    pub closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(saved: usize) -> Self {
        Self {
            fail_after: Some(saved),
            ..Self::default()
        }
    }
}

impl TrialStore for MemoryStore {
    fn open(&mut self) -> Result<(), StoreError> {
        self.opened = true;
        Ok(())
    }

    fn save_trial(&mut self, record: &TrialRecord) -> Result<(), StoreError> {
        if self.fail_after.is_some_and(|n| self.records.len() >= n) {
            return Err(StoreError::Rejected {
                trial: record.trial,
            });
        }
        self.records.push(*record);
        Ok(())
    }

    fn save_frames(
        &mut self,
        trial: usize,
        attempt: u32,
        frames: &[FrameRecord],
    ) -> Result<(), StoreError> {
        self.frame_counts.push((trial, attempt, frames.len()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        Ok(())
    }
}
