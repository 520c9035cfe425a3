//! Forward-only tracker of where a pipeline run is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Pending,
    Fetching,
    Writing,
    Uploading,
    Loading,
    Transforming,
    Testing,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Writing => "writing",
            Self::Uploading => "uploading",
            Self::Loading => "loading",
            Self::Transforming => "transforming",
            Self::Testing => "testing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared by every task of one run. Moves to a later stage only; parallel
/// branches reporting an earlier stage leave it where it is. `Done` and
/// `Failed` are final.
#[derive(Debug)]
pub struct StageTracker {
    current: Mutex<PipelineStage>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: Mutex::new(PipelineStage::Pending),
        }
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> PipelineStage {
        self.current
            .lock()
            .map_or(PipelineStage::Failed, |stage| *stage)
    }

    /// Returns the stage after the call.
    pub fn advance(&self, to: PipelineStage) -> PipelineStage {
        let Ok(mut stage) = self.current.lock() else {
            return PipelineStage::Failed;
        };
        let moves = !stage.is_terminal() && (to == PipelineStage::Failed || to > *stage);
        if moves {
            debug!(from = %*stage, to = %to, "pipeline stage");
            *stage = to;
        }
        *stage
    }

    pub fn fail(&self) -> PipelineStage {
        self.advance(PipelineStage::Failed)
    }
}
