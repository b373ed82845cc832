use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::infrastructure::storage::workspace::Workspace;
use super::params::EncodeParams;

/// Extension every frame ends up with after normalization.
pub const CANONICAL_EXT: &str = "png";
pub const OUTPUT_CONTAINER: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Png,
    Jpeg,
}

impl FrameFormat {
    /// Case-insensitive match on the file extension; anything else is not a frame.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        if ext.eq_ignore_ascii_case("png") {
            Some(FrameFormat::Png)
        } else if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") {
            Some(FrameFormat::Jpeg)
        } else {
            None
        }
    }

    pub fn is_canonical(self) -> bool {
        matches!(self, FrameFormat::Png)
    }
}

/// One image found in the extracted archive, with its place in the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEntry {
    pub original_name: String,
    pub format: FrameFormat,
    /// 1-based, contiguous across the whole sequence.
    pub index: u32,
}

impl FrameEntry {
    pub fn target_name(&self) -> String {
        frame_file_name(self.index)
    }
}

pub fn frame_file_name(index: u32) -> String {
    format!("frame_{:04}.{}", index, CANONICAL_EXT)
}

/// How the normalizer orders frames before numbering them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameOrder {
    /// Plain byte-wise sort of the original names. Clients zero-pad their names.
    #[default]
    Lexical,
    /// Digit runs compare by numeric value, so `f2.png` precedes `f10.png`.
    Natural,
}

impl FromStr for FrameOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lexical" | "lexicographic" => Ok(FrameOrder::Lexical),
            "natural" | "numeric" => Ok(FrameOrder::Natural),
            other => Err(format!("unknown frame order '{}'", other)),
        }
    }
}

/// Pipeline stage, used to tag log lines and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Extract,
    Normalize,
    Encode,
    Deliver,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Extract => "extract",
            JobStage::Normalize => "normalize",
            JobStage::Encode => "encode",
            JobStage::Deliver => "deliver",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Allocated,
    Extracted,
    Normalized { frames: usize },
    Encoded,
    Failed(JobStage),
}

impl JobState {
    /// The stage that runs next from this state.
    pub fn next_stage(self) -> JobStage {
        match self {
            JobState::Allocated => JobStage::Extract,
            JobState::Extracted => JobStage::Normalize,
            JobState::Normalized { .. } => JobStage::Encode,
            JobState::Encoded => JobStage::Deliver,
            JobState::Failed(stage) => stage,
        }
    }
}

/// A single render request. Owned by the handler that created it and never shared.
#[derive(Debug)]
pub struct Job {
    pub workspace: Workspace,
    pub params: EncodeParams,
    pub state: JobState,
}

impl Job {
    pub fn new(workspace: Workspace, params: EncodeParams) -> Self {
        Self {
            workspace,
            params,
            state: JobState::Allocated,
        }
    }

    pub fn id(&self) -> Uuid {
        self.workspace.id()
    }
}
