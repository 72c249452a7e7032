use crate::domain::ChainResult;
use crate::modules::document::JobDocument;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Identifier the batch scheduler hands back for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl Display for JobHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait BatchScheduler {
    /// Vendor syntax of the document's directive block, prologue and run
    /// command.
    fn render(&self, document: &JobDocument) -> String;

    fn submit(&self, script_path: &Path) -> ChainResult<JobHandle>;
}
