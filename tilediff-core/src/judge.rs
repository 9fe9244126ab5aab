//! Perceptual equality of tile payloads.
//!
//! A [`SimilarityJudge`] decodes two payloads and asks a
//! [`DistortionMetric`] how far apart they are. Pairs whose distortion is
//! strictly below the configured threshold are considered visually equal.

use std::fmt;

use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use image_compare::Algorithm;
use thiserror::Error;

/// Threshold used when none is configured.
pub const DEFAULT_TILE_DIFF_THRESHOLD: f64 = 0.02;

/// Which payload of a pair failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The reference payload.
    Reference,
    /// The candidate payload.
    Candidate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reference => "reference",
            Self::Candidate => "candidate",
        })
    }
}

/// Errors raised while judging tile similarity.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// The threshold was negative or not a number.
    #[error("similarity threshold must be a finite, non-negative number (got {threshold})")]
    InvalidThreshold {
        /// Rejected threshold.
        threshold: f64,
    },
    /// A payload could not be decoded as an image.
    #[error("failed to decode {side} tile ({len} bytes): {source}")]
    Decode {
        /// Which payload failed.
        side: Side,
        /// Size of the payload in bytes.
        len: usize,
        /// Source error from the `image` crate.
        #[source]
        source: image::ImageError,
    },
    /// The distortion metric could not score a decoded pair.
    #[error("failed to score tile distortion: {source}")]
    Metric {
        /// Source error from the comparison library.
        #[source]
        source: image_compare::CompareError,
    },
}

/// Numeric dissimilarity between two decoded images; lower is more similar.
pub trait DistortionMetric {
    /// Score the distortion between `reference` and `candidate`.
    ///
    /// # Errors
    /// Returns [`JudgeError::Metric`] when the pair cannot be scored.
    fn distortion(
        &self,
        reference: &DynamicImage,
        candidate: &DynamicImage,
    ) -> Result<f64, JudgeError>;
}

/// Root-mean-square error per RGBA channel, normalised to `0.0..=1.0`.
///
/// Each channel is scored separately with `image_compare`; the worst
/// channel sets the distortion. Images with different dimensions score
/// `1.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootMeanSquareError;

impl DistortionMetric for RootMeanSquareError {
    #[expect(
        clippy::float_arithmetic,
        reason = "image_compare reports similarity, distortion is its complement"
    )]
    fn distortion(
        &self,
        reference: &DynamicImage,
        candidate: &DynamicImage,
    ) -> Result<f64, JudgeError> {
        let reference_planes = channel_planes(&reference.to_rgba8());
        let candidate_planes = channel_planes(&candidate.to_rgba8());
        let mut worst = 0.0_f64;
        for (first, second) in reference_planes.iter().zip(&candidate_planes) {
            let similarity = match image_compare::gray_similarity_structure(
                &Algorithm::RootMeanSquared,
                first,
                second,
            ) {
                Ok(similarity) => similarity,
                Err(image_compare::CompareError::DimensionsDiffer) => return Ok(1.0),
                Err(source) => return Err(JudgeError::Metric { source }),
            };
            worst = worst.max(1.0 - similarity.score);
        }
        Ok(worst)
    }
}

fn channel_planes(image: &RgbaImage) -> [GrayImage; 4] {
    let (width, height) = image.dimensions();
    let plane = |pick: fn([u8; 4]) -> u8| {
        GrayImage::from_fn(width, height, |x, y| Luma([pick(image.get_pixel(x, y).0)]))
    };
    [
        plane(|[red, _, _, _]| red),
        plane(|[_, green, _, _]| green),
        plane(|[_, _, blue, _]| blue),
        plane(|[_, _, _, alpha]| alpha),
    ]
}

/// Decides whether two tile payloads are visually equal.
///
/// # Examples
///
/// ```
/// use tilediff_core::SimilarityJudge;
///
/// let judge = SimilarityJudge::new(0.05).expect("valid threshold");
/// assert!(judge.is_similar(b"", b"").is_err());
/// ```
pub struct SimilarityJudge {
    threshold: f64,
    metric: Box<dyn DistortionMetric>,
}

impl fmt::Debug for SimilarityJudge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimilarityJudge")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl SimilarityJudge {
    /// Judge with the [`RootMeanSquareError`] metric.
    ///
    /// # Errors
    /// Returns [`JudgeError::InvalidThreshold`] for negative or non-finite
    /// thresholds.
    pub fn new(threshold: f64) -> Result<Self, JudgeError> {
        Self::with_metric(threshold, RootMeanSquareError)
    }

    /// Judge with a custom metric.
    ///
    /// # Errors
    /// Returns [`JudgeError::InvalidThreshold`] for negative or non-finite
    /// thresholds.
    pub fn with_metric<M>(threshold: f64, metric: M) -> Result<Self, JudgeError>
    where
        M: DistortionMetric + 'static,
    {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(JudgeError::InvalidThreshold { threshold });
        }
        Ok(Self {
            threshold,
            metric: Box::new(metric),
        })
    }

    /// Threshold below which distortion counts as equal.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decode both payloads and compare their distortion to the threshold.
    ///
    /// Equality at the threshold counts as dissimilar.
    ///
    /// # Errors
    /// Returns [`JudgeError::Decode`] when either payload, including an
    /// empty one, is not a decodable image, and [`JudgeError::Metric`] when
    /// the metric cannot score the pair.
    pub fn is_similar(&self, reference: &[u8], candidate: &[u8]) -> Result<bool, JudgeError> {
        let reference_image = decode(reference, Side::Reference)?;
        let candidate_image = decode(candidate, Side::Candidate)?;
        let distortion = self.metric.distortion(&reference_image, &candidate_image)?;
        log::trace!("distortion {distortion} against threshold {}", self.threshold);
        Ok(distortion < self.threshold)
    }
}

impl Default for SimilarityJudge {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_TILE_DIFF_THRESHOLD,
            metric: Box::new(RootMeanSquareError),
        }
    }
}

fn decode(payload: &[u8], side: Side) -> Result<DynamicImage, JudgeError> {
    image::load_from_memory(payload).map_err(|source| JudgeError::Decode {
        side,
        len: payload.len(),
        source,
    })
}
