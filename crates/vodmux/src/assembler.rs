//! Stream assembler.
//!
//! Segments complete in any order. The assembler writes the initialization
//! segment first and then appends each spool file strictly in index order,
//! holding early arrivals in a reorder buffer until the gap before them is
//! filled. Everything lives under `<work_dir>/<job_id>/`; an assembler that is
//! dropped without [`Assembler::finish`] removes that directory.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use manifest::TrackKind;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::job::JobId;

pub struct Assembler {
    job_dir: PathBuf,
    part_path: PathBuf,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
    total: usize,
    /// Next index to append.
    next: usize,
    /// Completed segments waiting for an earlier index.
    pending: BTreeMap<usize, PathBuf>,
    bytes_written: u64,
    finished: bool,
}

impl Assembler {
    /// Create the job directory and the partial elementary file, and write
    /// the initialization segment into it.
    pub async fn create(
        work_dir: &Path,
        job_id: JobId,
        kind: TrackKind,
        init_segment: &[u8],
        total: usize,
    ) -> Result<Self> {
        let job_dir = work_dir.join(job_id.to_string());
        tokio::fs::create_dir_all(&job_dir).await?;

        let final_path = job_dir.join(format!("{}.mp4", kind.as_str()));
        let part_path = job_dir.join(format!("{}.mp4.part", kind.as_str()));

        let mut assembler = Self {
            job_dir,
            part_path,
            final_path,
            writer: None,
            total,
            next: 0,
            pending: BTreeMap::new(),
            bytes_written: 0,
            finished: false,
        };

        let mut writer = BufWriter::new(File::create(&assembler.part_path).await?);
        writer.write_all(init_segment).await?;
        assembler.writer = Some(writer);
        assembler.bytes_written = init_segment.len() as u64;

        debug!(
            path = %assembler.part_path.display(),
            init_bytes = init_segment.len(),
            total,
            "Assembler created"
        );
        Ok(assembler)
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    /// Where the fetcher should spool segment `index`.
    pub fn spool_path(&self, index: usize) -> PathBuf {
        self.job_dir.join(format!("seg-{index:05}.part"))
    }

    /// Number of segments appended so far.
    pub fn appended(&self) -> usize {
        self.next
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Hand over the spool file of a completed segment.
    pub async fn accept(&mut self, index: usize, spool: PathBuf) -> Result<()> {
        if index >= self.total {
            return Err(Error::internal(format!(
                "segment {index} is out of range ({} segments)",
                self.total
            )));
        }
        if index < self.next || self.pending.contains_key(&index) {
            return Err(Error::internal(format!("segment {index} delivered twice")));
        }

        self.pending.insert(index, spool);
        while let Some(spool) = self.pending.remove(&self.next) {
            self.append(&spool).await?;
            trace!(index = self.next, "Segment appended");
            self.next += 1;
        }
        Ok(())
    }

    async fn append(&mut self, spool: &Path) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::internal("assembler already closed"))?;
        let mut source = File::open(spool).await?;
        self.bytes_written += tokio::io::copy(&mut source, writer).await?;
        drop(source);
        tokio::fs::remove_file(spool).await?;
        Ok(())
    }

    /// Flush and rename the elementary file into place. Fails if any segment
    /// has not been appended; on failure the job directory is removed.
    pub async fn finish(mut self) -> Result<PathBuf> {
        match self.seal().await {
            Ok(path) => Ok(path),
            Err(err) => {
                self.abort().await;
                Err(err)
            }
        }
    }

    async fn seal(&mut self) -> Result<PathBuf> {
        if self.next < self.total {
            return Err(Error::internal(format!(
                "segment {} missing, {} of {} appended",
                self.next, self.next, self.total
            )));
        }

        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| Error::internal("assembler already closed"))?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);

        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        self.finished = true;

        debug!(
            path = %self.final_path.display(),
            bytes = self.bytes_written,
            "Elementary stream finalized"
        );
        Ok(self.final_path.clone())
    }

    /// Discard the partial file and every spool file.
    pub async fn abort(mut self) {
        self.writer.take();
        self.finished = true;
        remove_job_dir(&self.job_dir).await;
    }
}

/// Backstop for assemblers dropped mid-await (task aborted, runtime shutting
/// down). Worker error paths go through [`Assembler::abort`]; this one blocks
/// the executor thread on `remove_dir_all`.
impl Drop for Assembler {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.writer.take();
        match std::fs::remove_dir_all(&self.job_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.job_dir.display(), error = %e, "Failed to clean up job directory"),
        }
    }
}

/// Remove a job directory, tolerating its absence.
pub(crate) async fn remove_job_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "Failed to clean up job directory"),
    }
}
