//! Stage pipeline definition.

use thiserror::Error;

/// Errors in a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("stage {stage} target {target} is outside 1..=100")]
    TargetOutOfRange { stage: String, target: u8 },

    #[error("stage {stage} target {target} does not exceed previous target {previous}")]
    NotIncreasing {
        stage: String,
        target: u8,
        previous: u8,
    },

    #[error("pipeline must end with exactly one classification stage at 100")]
    MissingClassification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Simulated work followed by a progress checkpoint.
    Checkpoint,
    /// Calls the classifier and completes the job.
    Classify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub target_progress: u8,
    pub message: String,
    pub kind: StageKind,
}

impl Stage {
    pub fn checkpoint(name: impl Into<String>, target_progress: u8, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_progress,
            message: message.into(),
            kind: StageKind::Checkpoint,
        }
    }

    pub fn classify(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_progress: 100,
            message: String::new(),
            kind: StageKind::Classify,
        }
    }
}

/// Ordered, validated list of stages a runner walks through.
#[derive(Debug, Clone)]
pub struct StagePipeline {
    stages: Vec<Stage>,
}

impl StagePipeline {
    /// Validate and build a pipeline.
    ///
    /// Targets must be strictly increasing within 1..=100 and the last stage
    /// must be the only classification stage, at 100.
    pub fn new(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        let last = stages.last().ok_or(PipelineError::Empty)?;
        if last.kind != StageKind::Classify || last.target_progress != 100 {
            return Err(PipelineError::MissingClassification);
        }
        if stages.iter().filter(|s| s.kind == StageKind::Classify).count() != 1 {
            return Err(PipelineError::MissingClassification);
        }

        let mut previous = 0u8;
        for stage in &stages {
            if !(1..=100).contains(&stage.target_progress) {
                return Err(PipelineError::TargetOutOfRange {
                    stage: stage.name.clone(),
                    target: stage.target_progress,
                });
            }
            if stage.target_progress <= previous {
                return Err(PipelineError::NotIncreasing {
                    stage: stage.name.clone(),
                    target: stage.target_progress,
                    previous,
                });
            }
            previous = stage.target_progress;
        }

        Ok(Self { stages })
    }

    /// The five-checkpoint moderation pipeline.
    pub fn reference() -> Self {
        Self {
            stages: vec![
                Stage::checkpoint("validate", 20, "Validating video format..."),
                Stage::checkpoint("metadata", 40, "Extracting metadata..."),
                Stage::checkpoint("analyze", 60, "Analyzing content..."),
                Stage::checkpoint("sensitivity", 80, "Running sensitivity checks..."),
                Stage::checkpoint("finalize", 95, "Finalizing analysis..."),
                Stage::classify("classify"),
            ],
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Progress values written by checkpoint stages, in order.
    pub fn checkpoint_targets(&self) -> Vec<u8> {
        self.stages
            .iter()
            .filter(|s| s.kind == StageKind::Checkpoint)
            .map(|s| s.target_progress)
            .collect()
    }
}

impl Default for StagePipeline {
    fn default() -> Self {
        Self::reference()
    }
}
