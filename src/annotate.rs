use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{PipelineError, Result};

/// Runs the annotation tool on one chunk file.
///
/// `chunk` lives inside `workspace`, a directory owned exclusively by the
/// calling task and deleted when the task ends. The returned text is the
/// tool's report in RepeatMasker `.out` layout, in chunk coordinates.
pub trait Annotator: Send + Sync {
    fn annotate(&self, chunk: &Path, workspace: &Path) -> Result<String>;
}

/// Invokes RepeatMasker as a child process.
#[derive(Debug, Clone)]
pub struct RepeatMaskerInvoker {
    pub program: PathBuf,
    pub species: String,
    pub extra_args: Vec<String>,
    pub timeout: Option<Duration>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const STDERR_FILE: &str = "annotate.stderr";

impl RepeatMaskerInvoker {
    pub fn new(species: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("RepeatMasker"),
            species: species.into(),
            extra_args: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_program<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn command(&self, chunk: &Path, workspace: &Path) -> Result<Command> {
        // A file rather than a pipe: nothing drains stderr while we poll.
        let stderr = fs::File::create(workspace.join(STDERR_FILE))?;
        let mut cmd = Command::new(&self.program);
        cmd.arg("-species")
            .arg(&self.species)
            .args(&self.extra_args)
            .arg(chunk)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr));
        // Own process group, so a timeout also reaches the tool's helpers.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        Ok(cmd)
    }
}

/// Where RepeatMasker leaves its report for a given input.
pub fn report_path(chunk: &Path) -> PathBuf {
    let mut name = chunk.as_os_str().to_owned();
    name.push(".out");
    PathBuf::from(name)
}

/// Kill the child and everything it spawned into its process group.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: plain syscall; a negative pid addresses the group the child leads.
        unsafe {
            libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

impl Annotator for RepeatMaskerInvoker {
    fn annotate(&self, chunk: &Path, workspace: &Path) -> Result<String> {
        let started = Instant::now();
        let mut child = self.command(chunk, workspace)?.spawn().map_err(|e| {
            PipelineError::Tool(format!(
                "cannot run {}: {}",
                self.program.display(),
                e
            ))
        })?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    kill_tree(&mut child);
                    return Err(PipelineError::Tool(format!(
                        "{} timed out after {}s on {}",
                        self.program.display(),
                        limit.as_secs(),
                        chunk.display()
                    )));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let stderr = fs::read_to_string(workspace.join(STDERR_FILE)).unwrap_or_default();
            return Err(PipelineError::Tool(format!(
                "{} exited with {} on {}: {}",
                self.program.display(),
                status,
                chunk.display(),
                stderr.lines().last().unwrap_or("").trim()
            )));
        }

        let out_path = report_path(chunk);
        let text = fs::read_to_string(&out_path).map_err(|e| {
            PipelineError::Tool(format!("missing report {}: {}", out_path.display(), e))
        })?;

        info!(
            "[annotate] {} finished in {:.1}s",
            chunk.display(),
            started.elapsed().as_secs_f64()
        );
        debug!("[annotate] {} report bytes", text.len());
        Ok(text)
    }
}
