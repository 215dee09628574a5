//! `start` and `resume` entry points.
//!
//! Layout under the work directory:
//!
//! ```text
//! <work_dir>/blobs/<2 hex>/<sha256>      content-addressed blobs
//! <work_dir>/runs/<run_id>/state.json    run id, configuration, input blob
//! <work_dir>/runs/<run_id>/tasks/        one record per started task
//! <work_dir>/runs/<run_id>/tmp/          per-task scratch directories
//! ```
//!
//! The run id is derived from the input content and the run configuration,
//! so the same input with the same parameters always names the same run.

use log::info;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::annotate::Annotator;
use crate::chunker;
use crate::error::{PipelineError, Result};
use crate::fasta;
use crate::mask::{MaskApplier, MaskPolicy, Masker};
use crate::scheduler::{self, CancelToken, RunOutcome, Scheduler, SchedulerOptions};
use crate::state::{self, RunConfig, RunState};
use crate::store::{BlobId, BlobStore, LocalBlobStore};

pub struct Pipeline {
    work_dir: PathBuf,
    store: LocalBlobStore,
    annotator: Arc<dyn Annotator>,
    masker: Option<Arc<dyn MaskApplier>>,
    options: SchedulerOptions,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new<P: AsRef<Path>>(work_dir: P, annotator: Arc<dyn Annotator>) -> Result<Self> {
        let work_dir = work_dir.as_ref().to_path_buf();
        let store = LocalBlobStore::open(work_dir.join("blobs"))?;
        Ok(Self {
            work_dir,
            store,
            annotator,
            masker: None,
            options: SchedulerOptions::default(),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the in-process masker chosen from the run's mask policy.
    pub fn with_mask_applier(mut self, masker: Arc<dyn MaskApplier>) -> Self {
        self.masker = Some(masker);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &LocalBlobStore {
        &self.store
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        state::run_dir(&self.work_dir, run_id)
    }

    /// The persisted state of a run, as `resume` would see it.
    pub fn load_state(&self, run_id: &str) -> Result<RunState> {
        RunState::load(&self.run_dir(run_id), &self.store)
    }

    fn run_exists(&self, run_id: &str) -> bool {
        state::state_path(&self.work_dir, run_id).exists()
    }

    /// Ingest and validate `input`, record a new run, and return its id.
    /// Nothing is scheduled if the input is rejected.
    pub fn prepare(&self, input: &Path, config: RunConfig) -> Result<String> {
        let (format, bytes) = fasta::read_plain_bytes(input)?;
        let sequences = fasta::parse_fasta_bytes(&bytes)?;
        chunker::validate(&sequences, &config.chunk)?;

        let input_id = self.store.put(&bytes)?;
        let run_id = derive_run_id(&input_id, &config)?;
        if self.run_exists(&run_id) {
            return Err(PipelineError::Input(format!(
                "run {run_id} already exists for this input and configuration; resume it instead"
            )));
        }

        let state = RunState::new(run_id.clone(), config, input_id);
        state.save(&self.run_dir(&run_id))?;
        info!(
            "[pipeline] run {} prepared: {} sequences ({:?} input)",
            run_id,
            sequences.len(),
            format
        );
        Ok(run_id)
    }

    /// Start a new run and drive it to completion.
    pub fn start(&self, input: &Path, config: RunConfig) -> Result<RunOutcome> {
        let run_id = self.prepare(input, config)?;
        self.execute(run_id.as_str())
    }

    /// Continue an existing run. Done tasks are kept; anything else,
    /// including work that was in flight when the process died, runs again.
    pub fn resume(&self, run_id: &str) -> Result<RunOutcome> {
        if !self.run_exists(run_id) {
            return Err(PipelineError::Input(format!("no run '{run_id}' in {}", self.work_dir.display())));
        }
        let mut state = self.load_state(run_id)?;
        state.reset_incomplete(&self.run_dir(run_id))?;
        info!(
            "[pipeline] resuming run {}: {} tasks done, {} to run",
            run_id,
            state.count(state::TaskStatus::Done),
            state.tasks.len() - state.count(state::TaskStatus::Done)
        );
        self.execute(run_id)
    }

    fn execute(&self, run_id: &str) -> Result<RunOutcome> {
        let run_dir = self.run_dir(run_id);
        let state = RunState::load(&run_dir, &self.store)?;
        let masker: Arc<dyn MaskApplier> = match &self.masker {
            Some(m) => Arc::clone(m),
            None => Arc::new(Masker::new(state.config.mask.unwrap_or(MaskPolicy::Soft))),
        };
        let scratch = scheduler::scratch_dir(&run_dir);

        let scheduler = Scheduler::new(
            state,
            run_dir,
            scratch,
            &self.store,
            self.annotator.as_ref(),
            masker.as_ref(),
            self.options.clone(),
            self.cancel.clone(),
        );
        let outcome = scheduler.run()?;
        info!(
            "[pipeline] run {} complete: report {}",
            outcome.run_id, outcome.report
        );
        Ok(outcome)
    }

    /// Copy a blob out of the store to a destination path.
    pub fn export(&self, id: &BlobId, dest: &Path) -> Result<()> {
        let bytes = self.store.get(id)?;
        fs::write(dest, bytes)?;
        Ok(())
    }
}

fn derive_run_id(input: &BlobId, config: &RunConfig) -> Result<String> {
    let config_json = serde_json::to_vec(config)
        .map_err(|e| PipelineError::Consistency(format!("cannot serialise config: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(input.as_str().as_bytes());
    hasher.update(&config_json);
    Ok(hex::encode(&hasher.finalize()[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkParams;

    #[test]
    fn test_run_id_depends_on_input_and_config() {
        let cfg = RunConfig {
            chunk: ChunkParams::default(),
            mask: None,
        };
        let masked = RunConfig {
            mask: Some(MaskPolicy::Soft),
            ..cfg
        };
        let a = BlobId::for_bytes(b">a\nACGT\n");
        let b = BlobId::for_bytes(b">b\nACGT\n");

        let id = derive_run_id(&a, &cfg).unwrap();
        assert_eq!(id.len(), 16);
        assert_eq!(id, derive_run_id(&a, &cfg).unwrap());
        assert_ne!(id, derive_run_id(&b, &cfg).unwrap());
        assert_ne!(id, derive_run_id(&a, &masked).unwrap());
    }
}
