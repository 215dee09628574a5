// Library exports for splitmask
pub mod annotate;
pub mod chunker;
pub mod delift;
pub mod error;
pub mod fasta;
pub mod lift;
pub mod mask;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod state;
pub mod store;

pub use error::{PipelineError, TaskFailure};
pub use pipeline::Pipeline;
pub use scheduler::{CancelToken, RunOutcome, SchedulerOptions};
pub use state::RunConfig;
