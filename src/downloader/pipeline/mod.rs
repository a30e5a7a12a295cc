//! Install task execution -- per-release phase orchestration.
//!
//! Split into focused submodules:
//! - [`context`] - Shared per-task state and phase transitions
//! - [`progress`] - Monotonic progress writer and periodic reporter
//! - [`orchestration`] - Download, extraction and install phases

mod context;
mod orchestration;
mod progress;


pub(crate) use orchestration::run_install_task;

pub(crate) use crate::recovery::DOWNLOAD_PHASE_END;

/// End of the merge range
pub(crate) const MERGE_PHASE_END: f32 = 0.85;
/// End of the extraction range
pub(crate) const EXTRACT_PHASE_END: f32 = 0.92;
/// End of the expansion placement range
pub(crate) const OBB_PHASE_END: f32 = 0.94;
/// End of the staging range
pub(crate) const STAGE_PHASE_END: f32 = 0.96;
