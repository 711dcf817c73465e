use crate::error::{AppError, Result};
use image::RgbImage;

/// Result of one extraction attempt.
///
/// Stages keep "the book has no cover" apart from "the book could not be
/// read"; [`crate::formats::CoverService::get_or_extract_cover`] erases the
/// difference.
#[derive(Debug)]
pub enum CoverOutcome {
    /// A cover was extracted.
    Found(RgbImage),
    /// The book was readable but declares no usable cover.
    NotFound,
    /// The book or its cover could not be read.
    Failed(AppError),
}

impl CoverOutcome {
    /// Classify a stage result.
    pub fn from_result(result: Result<Option<RgbImage>>) -> Self {
        match result {
            Ok(Some(image)) => CoverOutcome::Found(image),
            Ok(None) => CoverOutcome::NotFound,
            Err(e) => CoverOutcome::Failed(e),
        }
    }

    /// Whether a cover was extracted.
    pub fn is_found(&self) -> bool {
        matches!(self, CoverOutcome::Found(_))
    }

    /// Collapse to the public "cover or nothing" contract.
    pub fn into_image(self) -> Option<RgbImage> {
        match self {
            CoverOutcome::Found(image) => Some(image),
            CoverOutcome::NotFound | CoverOutcome::Failed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_stage_results() {
        let found = CoverOutcome::from_result(Ok(Some(RgbImage::new(2, 3))));
        assert!(found.is_found());
        assert_eq!(found.into_image().map(|i| i.dimensions()), Some((2, 3)));

        assert!(matches!(CoverOutcome::from_result(Ok(None)), CoverOutcome::NotFound));

        let failed = CoverOutcome::from_result(Err(AppError::InvalidFormat("bad".into())));
        assert!(matches!(failed, CoverOutcome::Failed(AppError::InvalidFormat(_))));
        assert!(failed.into_image().is_none());
    }
}
