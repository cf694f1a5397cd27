mod model;
mod registry;

pub use model::{Job, JobStatus, StageSummary};
pub use registry::{JobRegistry, JobWriter};
