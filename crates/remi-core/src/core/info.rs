use serde::{Deserialize, Serialize};

use crate::ProcessId;

/// Represents information about the attached process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RemiInfo {
    /// The target process identifier.
    pub pid: ProcessId,

    /// The size of a page in bytes.
    pub page_size: u64,
}
