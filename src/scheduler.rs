//! DAG executor for one run
//!
//! The graph starts as a single split task. When split is done its manifest
//! (chunk blobs + Lift Map) expands the graph to one annotate task per chunk
//! file, a merge task over all of them and, optionally, a mask task after
//! merge. Ready tasks (pending, every dependency done) run in parallel on a
//! rayon pool; each task owns its own scratch directory and writes only its
//! own output blob.
//!
//! The only shared mutable data is the [`RunState`]. Every transition is
//! written to the task's own record under its lock and published only once
//! the write succeeded, so a task is satisfied only once its `done` record
//! is durable.

use log::{error, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use crate::annotate::Annotator;
use crate::chunker;
use crate::delift::delift;
use crate::error::{PipelineError, Result, TaskFailure};
use crate::fasta;
use crate::lift::LiftMap;
use crate::mask::{self, MaskApplier};
use crate::merge;
use crate::report;
use crate::state::{
    RunState, SplitManifest, TaskKind, TaskRecord, TaskStatus, MASK_TASK, MERGE_TASK, SPLIT_TASK,
};
use crate::store::{BlobId, BlobStore};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Runtime knobs. Not persisted: they do not affect output.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Worker threads for independent tasks
    pub threads: usize,

    /// Attempts per task for infrastructure failures (>= 1)
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    pub retry_backoff: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Shared flag for cancelling a run from outside the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Identifiers of a completed run's outputs.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub report: BlobId,
    pub masked: Option<BlobId>,
    pub lift_map: LiftMap,
}

pub struct Scheduler<'a> {
    store: &'a dyn BlobStore,
    annotator: &'a dyn Annotator,
    masker: &'a dyn MaskApplier,
    state: Mutex<RunState>,
    run_dir: PathBuf,
    scratch: PathBuf,
    options: SchedulerOptions,
    cancel: CancelToken,
    lift_map: OnceLock<LiftMap>,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: RunState,
        run_dir: PathBuf,
        scratch: PathBuf,
        store: &'a dyn BlobStore,
        annotator: &'a dyn Annotator,
        masker: &'a dyn MaskApplier,
        options: SchedulerOptions,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            annotator,
            masker,
            state: Mutex::new(state),
            run_dir,
            scratch,
            options,
            cancel,
            lift_map: OnceLock::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RunState>> {
        self.state
            .lock()
            .map_err(|_| PipelineError::Consistency("run state lock poisoned".to_string()))
    }

    /// Apply `f` to one task and persist it before returning. On error the
    /// task is left as it was.
    fn commit(&self, id: &str, f: impl FnOnce(&mut TaskRecord)) -> Result<()> {
        self.lock()?.commit_task(&self.run_dir, id, f)
    }

    /// A copy of the current run state.
    pub fn snapshot(&self) -> Result<RunState> {
        Ok(self.lock()?.clone())
    }

    /// Execute every remaining task. Returns the output identifiers once all
    /// tasks are done; never returns partial output.
    pub fn run(&self) -> Result<RunOutcome> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads.max(1))
            .build()
            .map_err(|e| PipelineError::Infrastructure(format!("thread pool: {e}")))?;
        std::fs::create_dir_all(&self.scratch)?;

        loop {
            self.expand_if_ready()?;

            if self.cancel.is_cancelled() {
                let cancelled = self.lock()?.cancel_pending(&self.run_dir)?;
                warn!("[scheduler] run cancelled, {cancelled} pending tasks cancelled");
                return Err(PipelineError::Cancelled);
            }

            let ready = self.lock()?.ready_tasks();
            if ready.is_empty() {
                if self.lock()?.all_done() {
                    break;
                }
                return Err(PipelineError::Consistency(
                    "no task is ready but the run is not complete".to_string(),
                ));
            }

            let abort = AtomicBool::new(false);
            let failures: Vec<TaskFailure> = pool.install(|| {
                ready
                    .par_iter()
                    .filter_map(|id| {
                        if abort.load(Ordering::SeqCst) {
                            return None;
                        }
                        match self.execute(id) {
                            Ok(_) | Err(PipelineError::Cancelled) => None,
                            Err(e) => {
                                abort.store(true, Ordering::SeqCst);
                                Some(TaskFailure {
                                    task_id: id.clone(),
                                    reason: e.to_string(),
                                })
                            }
                        }
                    })
                    .collect()
            });

            if !failures.is_empty() {
                for failure in &failures {
                    error!("[scheduler] task {failure}");
                }
                return Err(PipelineError::RunFailed { failures });
            }
        }

        self.outcome()
    }

    fn outcome(&self) -> Result<RunOutcome> {
        let state = self.lock()?;
        let report = state.task(MERGE_TASK)?.output.clone().ok_or_else(|| {
            PipelineError::Consistency("merge is done but has no output".to_string())
        })?;
        let masked = match state.tasks.get(MASK_TASK) {
            Some(task) => Some(task.output.clone().ok_or_else(|| {
                PipelineError::Consistency("mask is done but has no output".to_string())
            })?),
            None => None,
        };
        let lift_map = state
            .lift_map
            .clone()
            .ok_or_else(|| PipelineError::Consistency("run has no lift map".to_string()))?;
        Ok(RunOutcome {
            run_id: state.run_id.clone(),
            report,
            masked,
            lift_map,
        })
    }

    /// Add the post-split tasks once split is done. Idempotent. Nothing is
    /// written: the graph is rebuilt from the manifest on load.
    fn expand_if_ready(&self) -> Result<()> {
        let manifest_id = {
            let state = self.lock()?;
            if state.is_expanded() || !state.is_done(SPLIT_TASK) {
                None
            } else {
                state.task(SPLIT_TASK)?.output.clone()
            }
        };
        let Some(manifest_id) = manifest_id else {
            return Ok(());
        };

        let manifest = SplitManifest::fetch(self.store, &manifest_id)?;
        let chunk_count = manifest.chunks.len();
        let mut state = self.lock()?;
        if !state.is_expanded() {
            state.expand(&manifest.chunks, manifest.lift_map);
        }
        info!("[scheduler] graph expanded: {chunk_count} annotate tasks");
        Ok(())
    }

    fn lift_map(&self) -> Result<&LiftMap> {
        if let Some(map) = self.lift_map.get() {
            return Ok(map);
        }
        let map = self
            .lock()?
            .lift_map
            .clone()
            .ok_or_else(|| PipelineError::Consistency("lift map requested before split".into()))?;
        Ok(self.lift_map.get_or_init(|| map))
    }

    /// Run one task to a terminal state. A task already `done` returns its
    /// cached output without running.
    pub fn execute(&self, id: &str) -> Result<BlobId> {
        let kind = {
            let state = self.lock()?;
            let task = state.task(id)?;
            if task.status == TaskStatus::Done {
                if let Some(output) = &task.output {
                    if self.store.contains(output) {
                        return Ok(output.clone());
                    }
                }
            }
            if let Some(dep) = task.deps.iter().find(|d| !state.is_done(d)) {
                return Err(PipelineError::Consistency(format!(
                    "task '{id}' scheduled before dependency '{dep}' is done"
                )));
            }
            task.kind.clone()
        };

        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.commit(id, |t| t.status = TaskStatus::Running)?;

        let mut attempt = 0;
        let mut backoff = self.options.retry_backoff;
        loop {
            attempt += 1;
            match self.run_task(id, &kind) {
                Ok(output) => {
                    if self.cancel.is_cancelled() {
                        self.commit(id, |t| {
                            t.status = TaskStatus::Cancelled;
                            t.attempts += attempt;
                        })?;
                        return Err(PipelineError::Cancelled);
                    }
                    let committed = self.commit(id, |t| {
                        t.status = TaskStatus::Done;
                        t.output = Some(output.clone());
                        t.error = None;
                        t.attempts += attempt;
                    });
                    if let Err(e) = committed {
                        // The output exists but is not recorded; never report it.
                        let _ = self.fail(id, attempt, &e);
                        return Err(e);
                    }
                    let (done, total) = {
                        let state = self.lock()?;
                        (state.count(TaskStatus::Done), state.tasks.len())
                    };
                    info!("[scheduler] {id} done ({done}/{total})");
                    return Ok(output);
                }
                Err(e) if e.is_retryable() && attempt < self.options.max_attempts => {
                    warn!(
                        "[scheduler] {id} attempt {attempt} failed: {e}, retrying in {}ms",
                        backoff.as_millis()
                    );
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    self.fail(id, attempt, &e)?;
                    return Err(e);
                }
            }
        }
    }

    fn fail(&self, id: &str, attempts: u32, e: &PipelineError) -> Result<()> {
        self.commit(id, |t| {
            t.status = TaskStatus::Failed;
            t.error = Some(e.to_string());
            t.attempts += attempts;
        })
    }

    fn run_task(&self, id: &str, kind: &TaskKind) -> Result<BlobId> {
        match kind {
            TaskKind::Split => self.run_split(),
            TaskKind::Annotate { chunk, .. } => self.run_annotate(id, chunk),
            TaskKind::Merge => self.run_merge(),
            TaskKind::Mask => self.run_mask(),
        }
    }

    fn input_sequences(&self) -> Result<Vec<fasta::Sequence>> {
        let input = self.lock()?.input.clone();
        fasta::parse_fasta_bytes(&self.store.get(&input)?)
    }

    fn dependency_output(&self, id: &str) -> Result<BlobId> {
        self.lock()?.task(id)?.output.clone().ok_or_else(|| {
            PipelineError::Consistency(format!("task '{id}' is done but has no output"))
        })
    }

    fn run_split(&self) -> Result<BlobId> {
        let params = self.lock()?.config.chunk;
        let sequences = self.input_sequences()?;
        let split = chunker::split(&sequences, &params)?;

        let mut chunks = Vec::with_capacity(split.files.len());
        for file in &split.files {
            chunks.push(self.store.put(&file.to_fasta())?);
        }
        let manifest = SplitManifest {
            chunks,
            lift_map: split.lift_map,
        };
        let bytes = serde_json::to_vec(&manifest)
            .map_err(|e| PipelineError::Consistency(format!("cannot serialise manifest: {e}")))?;
        self.store.put(&bytes)
    }

    fn run_annotate(&self, id: &str, chunk: &BlobId) -> Result<BlobId> {
        // Dropped on every exit path, removing the directory.
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{id}-"))
            .tempdir_in(&self.scratch)?;
        let chunk_path = workspace.path().join("input.fa");
        self.store.get_to_path(chunk, &chunk_path)?;

        let raw = self.annotator.annotate(&chunk_path, workspace.path())?;
        let records = report::parse_report(&raw)?;
        let lifted = delift(records, self.lift_map()?)?;
        self.store.put(report::format_rows(&lifted).as_bytes())
    }

    fn run_merge(&self) -> Result<BlobId> {
        let deps = self.lock()?.task(MERGE_TASK)?.deps.clone();
        let mut outputs = Vec::with_capacity(deps.len());
        for dep in &deps {
            let bytes = self.store.get(&self.dependency_output(dep)?)?;
            outputs.push(String::from_utf8(bytes).map_err(|_| {
                PipelineError::Consistency(format!("output of '{dep}' is not UTF-8"))
            })?);
        }
        let text = merge::merge_chunk_outputs(&outputs, self.lift_map()?)?;
        self.store.put(text.as_bytes())
    }

    fn run_mask(&self) -> Result<BlobId> {
        let report_bytes = self.store.get(&self.dependency_output(MERGE_TASK)?)?;
        let text = String::from_utf8(report_bytes)
            .map_err(|_| PipelineError::Consistency("merged report is not UTF-8".into()))?;
        let records = report::parse_report(&text)?;
        let originals = self.input_sequences()?;
        let masked = mask::mask_sequences(&originals, &records, self.masker)?;
        self.store.put(&fasta::fasta_bytes(&masked))
    }
}

/// Scratch directory for task workspaces of one run.
pub fn scratch_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("tmp")
}
