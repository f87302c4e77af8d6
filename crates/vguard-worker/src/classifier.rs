//! Content classification capability.

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use vguard_models::{MediaMetadata, MediaRef, ResultStatus};

use crate::error::ClassificationError;

const WIDTHS: [u32; 3] = [1920, 1280, 720];
const HEIGHTS: [u32; 3] = [1080, 720, 480];

/// Verdict and extracted metadata for one media file.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: ResultStatus,
    pub metadata: MediaMetadata,
}

impl Classification {
    pub fn new(status: ResultStatus, metadata: MediaMetadata) -> Self {
        Self { status, metadata }
    }
}

/// Decides whether media is acceptable.
///
/// Implementations may perform I/O. The runner awaits the call as one stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, media: &MediaRef) -> Result<Classification, ClassificationError>;
}

/// Randomized stand-in for a real moderation model.
#[derive(Debug, Clone)]
pub struct SimulatedClassifier {
    flag_threshold: f64,
}

impl SimulatedClassifier {
    pub fn new(flag_threshold: f64) -> Self {
        Self { flag_threshold }
    }

    pub fn flag_threshold(&self) -> f64 {
        self.flag_threshold
    }

    fn verdict(&self, sample: f64) -> ResultStatus {
        if sample > self.flag_threshold {
            ResultStatus::Flagged
        } else {
            ResultStatus::Accepted
        }
    }
}

impl Default for SimulatedClassifier {
    fn default() -> Self {
        Self::new(0.7)
    }
}

#[async_trait]
impl Classifier for SimulatedClassifier {
    async fn classify(&self, media: &MediaRef) -> Result<Classification, ClassificationError> {
        let (sample, duration, width, height, bitrate) = {
            let mut rng = rand::rng();
            (
                rng.random::<f64>(),
                rng.random_range(10..310u32),
                WIDTHS[rng.random_range(0..WIDTHS.len())],
                HEIGHTS[rng.random_range(0..HEIGHTS.len())],
                rng.random_range(1000..6000u32),
            )
        };

        let status = self.verdict(sample);
        debug!(
            media = %media.original_name,
            sample,
            status = %status,
            "Simulated classification"
        );

        let metadata = MediaMetadata::new()
            .with("duration", duration)
            .with("width", width)
            .with("height", height)
            .with("codec", "h264")
            .with("bitrate", bitrate);

        Ok(Classification::new(status, metadata))
    }
}

/// Returns the same result for every call.
#[derive(Debug, Clone)]
pub struct StaticClassifier {
    result: Result<Classification, ClassificationError>,
}

impl StaticClassifier {
    pub fn new(result: Result<Classification, ClassificationError>) -> Self {
        Self { result }
    }

    pub fn accepting() -> Self {
        Self::new(Ok(Classification::new(
            ResultStatus::Accepted,
            MediaMetadata::new().with("codec", "h264"),
        )))
    }

    pub fn flagging() -> Self {
        Self::new(Ok(Classification::new(
            ResultStatus::Flagged,
            MediaMetadata::new().with("codec", "h264"),
        )))
    }

    pub fn failing(error: ClassificationError) -> Self {
        Self::new(Err(error))
    }
}

#[async_trait]
impl Classifier for StaticClassifier {
    async fn classify(&self, _media: &MediaRef) -> Result<Classification, ClassificationError> {
        self.result.clone()
    }
}
