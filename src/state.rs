//! Persisted Run State
//!
//! Layout of one run directory:
//!
//! ```text
//! state.json           run id, configuration, input blob (written once)
//! tasks/<task_id>.json one record per task that has left `pending`
//! ```
//!
//! The task graph and the Lift Map are not stored here. They are rebuilt on
//! load from the split task's output, a [`SplitManifest`] blob. A transition
//! rewrites only the file of the task it concerns, atomically (write temp,
//! fsync, rename), so a task is either recorded `done` with its output or it
//! is not, and the cost of a transition does not grow with the run.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkParams;
use crate::error::{PipelineError, Result};
use crate::lift::LiftMap;
use crate::mask::MaskPolicy;
use crate::store::{BlobId, BlobStore};

pub const STATE_FILE: &str = "state.json";
pub const TASKS_DIR: &str = "tasks";

pub const SPLIT_TASK: &str = "split";
pub const MERGE_TASK: &str = "merge";
pub const MASK_TASK: &str = "mask";

pub fn annotate_task_id(chunk_index: usize) -> String {
    format!("annotate-{chunk_index:05}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskKind {
    Split,
    Annotate { chunk_index: usize, chunk: BlobId },
    Merge,
    Mask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(flatten)]
    pub kind: TaskKind,
    pub deps: Vec<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<BlobId>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl TaskRecord {
    pub fn new(kind: TaskKind, deps: Vec<String>) -> Self {
        Self {
            kind,
            deps,
            status: TaskStatus::Pending,
            output: None,
            attempts: 0,
            error: None,
            updated_at: None,
        }
    }
}

/// Output of the split task: the chunk files to annotate and the Lift Map
/// that undoes the split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitManifest {
    pub chunks: Vec<BlobId>,
    pub lift_map: LiftMap,
}

impl SplitManifest {
    pub fn fetch(store: &dyn BlobStore, id: &BlobId) -> Result<Self> {
        serde_json::from_slice(&store.get(id)?)
            .map_err(|e| PipelineError::Consistency(format!("split manifest {id} unreadable: {e}")))
    }
}

/// Parameters that determine the run's output. Persisted so that a resumed
/// run uses exactly what the original run used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub chunk: ChunkParams,
    pub mask: Option<MaskPolicy>,
}

/// The part of a run written once, when the run is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunHeader {
    run_id: String,
    config: RunConfig,
    input: BlobId,
    created_at: String,
}

#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    pub config: RunConfig,
    /// Plain (decompressed) input FASTA.
    pub input: BlobId,
    pub lift_map: Option<LiftMap>,
    pub tasks: IndexMap<String, TaskRecord>,
    pub created_at: String,
}

impl RunState {
    /// A fresh run containing only the split task; the rest of the graph is
    /// added once the split output is known.
    pub fn new(run_id: String, config: RunConfig, input: BlobId) -> Self {
        let mut tasks = IndexMap::new();
        tasks.insert(
            SPLIT_TASK.to_string(),
            TaskRecord::new(TaskKind::Split, Vec::new()),
        );
        Self {
            run_id,
            config,
            input,
            lift_map: None,
            tasks,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn task(&self, id: &str) -> Result<&TaskRecord> {
        self.tasks
            .get(id)
            .ok_or_else(|| PipelineError::Consistency(format!("no task '{id}' in run")))
    }

    pub fn task_mut(&mut self, id: &str) -> Result<&mut TaskRecord> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| PipelineError::Consistency(format!("no task '{id}' in run")))
    }

    pub fn is_done(&self, id: &str) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|t| t.status == TaskStatus::Done)
    }

    /// Pending tasks whose dependencies are all done, in graph order.
    pub fn ready_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.status == TaskStatus::Pending)
            .filter(|(_, t)| t.deps.iter().all(|d| self.is_done(d)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn all_done(&self) -> bool {
        self.tasks.values().all(|t| t.status == TaskStatus::Done)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Whether the post-split part of the graph has been added.
    pub fn is_expanded(&self) -> bool {
        self.tasks.contains_key(MERGE_TASK)
    }

    /// Add one annotate task per chunk file, the merge task and, if masking
    /// was requested, the mask task.
    pub fn expand(&mut self, chunks: &[BlobId], lift_map: LiftMap) {
        let mut annotate_ids = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let id = annotate_task_id(index);
            self.tasks.insert(
                id.clone(),
                TaskRecord::new(
                    TaskKind::Annotate {
                        chunk_index: index,
                        chunk: chunk.clone(),
                    },
                    vec![SPLIT_TASK.to_string()],
                ),
            );
            annotate_ids.push(id);
        }
        self.tasks.insert(
            MERGE_TASK.to_string(),
            TaskRecord::new(TaskKind::Merge, annotate_ids),
        );
        if self.config.mask.is_some() {
            self.tasks.insert(
                MASK_TASK.to_string(),
                TaskRecord::new(TaskKind::Mask, vec![MERGE_TASK.to_string()]),
            );
        }
        self.lift_map = Some(lift_map);
    }

    /// Apply `f` to a copy of one task, make the copy durable, then publish
    /// it. If the write fails the in-memory state is left untouched.
    pub fn commit_task(
        &mut self,
        run_dir: &Path,
        id: &str,
        f: impl FnOnce(&mut TaskRecord),
    ) -> Result<()> {
        let mut record = self.task(id)?.clone();
        f(&mut record);
        record.updated_at = Some(chrono::Utc::now().to_rfc3339());
        write_json(&task_path(run_dir, id), &record)?;
        *self.task_mut(id)? = record;
        Ok(())
    }

    fn commit_where(
        &mut self,
        run_dir: &Path,
        pred: impl Fn(&TaskRecord) -> bool,
        f: impl Fn(&mut TaskRecord),
    ) -> Result<usize> {
        let ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, t)| pred(t))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.commit_task(run_dir, id, &f)?;
        }
        Ok(ids.len())
    }

    /// Prepare a loaded state for another attempt: anything not `done` goes
    /// back to `pending`. Work in flight at a crash never counts as done.
    pub fn reset_incomplete(&mut self, run_dir: &Path) -> Result<usize> {
        self.commit_where(
            run_dir,
            |t| t.status != TaskStatus::Done && t.status != TaskStatus::Pending,
            |t| {
                t.status = TaskStatus::Pending;
                t.error = None;
            },
        )
    }

    /// Mark every pending task cancelled.
    pub fn cancel_pending(&mut self, run_dir: &Path) -> Result<usize> {
        self.commit_where(
            run_dir,
            |t| t.status == TaskStatus::Pending,
            |t| t.status = TaskStatus::Cancelled,
        )
    }

    /// Write the header and every task record. Transitions during a run go
    /// through [`RunState::commit_task`] instead.
    pub fn save(&self, run_dir: &Path) -> Result<()> {
        write_json(
            &run_dir.join(STATE_FILE),
            &RunHeader {
                run_id: self.run_id.clone(),
                config: self.config,
                input: self.input.clone(),
                created_at: self.created_at.clone(),
            },
        )?;
        for (id, record) in &self.tasks {
            write_json(&task_path(run_dir, id), record)?;
        }
        Ok(())
    }

    /// Rebuild a run from its directory. Tasks without a record are pending;
    /// the graph past split is expanded from the split manifest in `store`.
    pub fn load(run_dir: &Path, store: &dyn BlobStore) -> Result<Self> {
        let header: RunHeader = read_json(&run_dir.join(STATE_FILE))?;
        let mut state = Self {
            run_id: header.run_id,
            config: header.config,
            input: header.input,
            lift_map: None,
            tasks: IndexMap::new(),
            created_at: header.created_at,
        };
        state.tasks.insert(
            SPLIT_TASK.to_string(),
            TaskRecord::new(TaskKind::Split, Vec::new()),
        );

        let mut saved = read_task_records(run_dir)?;
        if let Some(split) = saved.shift_remove(SPLIT_TASK) {
            *state.task_mut(SPLIT_TASK)? = split;
        }
        if state.is_done(SPLIT_TASK) {
            let manifest_id = state.task(SPLIT_TASK)?.output.clone().ok_or_else(|| {
                PipelineError::Consistency("split is done but has no output".to_string())
            })?;
            let manifest = SplitManifest::fetch(store, &manifest_id)?;
            state.expand(&manifest.chunks, manifest.lift_map);
        }

        for (id, record) in saved {
            match state.tasks.get_mut(&id) {
                Some(task) if task.kind == record.kind => *task = record,
                _ => {
                    return Err(PipelineError::Consistency(format!(
                        "run {} has a record for task '{}' outside its graph",
                        state.run_id, id
                    )))
                }
            }
        }
        Ok(state)
    }
}

/// Directory holding one run's state.
pub fn run_dir(work_dir: &Path, run_id: &str) -> PathBuf {
    work_dir.join("runs").join(run_id)
}

pub fn state_path(work_dir: &Path, run_id: &str) -> PathBuf {
    run_dir(work_dir, run_id).join(STATE_FILE)
}

fn task_path(run_dir: &Path, id: &str) -> PathBuf {
    run_dir.join(TASKS_DIR).join(format!("{id}.json"))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::Consistency(format!("cannot serialise run state: {e}")))?;
    let dir = path
        .parent()
        .ok_or_else(|| PipelineError::Infrastructure("state path has no parent".into()))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| PipelineError::Infrastructure(e.to_string()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        PipelineError::Consistency(format!("run state {} is corrupt: {}", path.display(), e))
    })
}

/// Every task record in the run, by task id. Leftover temp files from an
/// interrupted write have no `.json` extension and are skipped.
fn read_task_records(run_dir: &Path) -> Result<IndexMap<String, TaskRecord>> {
    let dir = run_dir.join(TASKS_DIR);
    let mut records = IndexMap::new();
    if !dir.exists() {
        return Ok(records);
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    paths.retain(|p| p.extension().is_some_and(|ext| ext == "json"));
    paths.sort();
    for path in paths {
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        records.insert(id.to_string(), read_json(&path)?);
    }
    Ok(records)
}
