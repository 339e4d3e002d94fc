//! Face geometry, cropping, and the seams to detection/loading/classification.
//!
//! Detection and classification models live outside this crate; only the
//! shapes of their results are fixed here.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("unsupported reference scheme: {0}")]
    UnsupportedScheme(String),
    #[error("reference is not a local file path: {0}")]
    NotAFilePath(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
    #[error("classification failed: {0}")]
    ClassificationFailed(String),
}

/// Face box in normalized image coordinates (0–1, origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face box in pixel coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl NormalizedRect {
    /// Map to pixel space, flipping the y axis and clamping to the image.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> PixelRect {
        let iw = image_width as f32;
        let ih = image_height as f32;

        let w = self.width * iw;
        let h = self.height * ih;
        let left = (self.x * iw).clamp(0.0, iw);
        let top = ((1.0 - self.y) * ih - h).clamp(0.0, ih);
        let right = (self.x * iw + w).clamp(left, iw);
        let bottom = ((1.0 - self.y) * ih).clamp(top, ih);

        PixelRect {
            x: left.round() as u32,
            y: top.round() as u32,
            width: (right - left).round() as u32,
            height: (bottom - top).round() as u32,
        }
    }
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One candidate identity for a face, as reported by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonConfidence {
    pub name: String,
    pub confidence: f32,
}

/// A face cut out of a larger image.
#[derive(Debug, Clone)]
pub struct CroppedFace {
    pub image: DynamicImage,
    pub rect: PixelRect,
}

/// A cropped face together with the classifier's ranking for it.
#[derive(Debug, Clone)]
pub struct FoundFace {
    pub face: DynamicImage,
    pub location: PixelRect,
    /// Sorted by confidence, best first.
    pub confidence_set: Vec<PersonConfidence>,
}

impl FoundFace {
    pub fn new(face: CroppedFace, mut confidence_set: Vec<PersonConfidence>) -> Self {
        confidence_set.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self {
            face: face.image,
            location: face.rect,
            confidence_set,
        }
    }

    pub fn best(&self) -> Option<&PersonConfidence> {
        self.confidence_set.first()
    }
}

/// Finds face boxes in a decoded image.
pub trait FaceDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<NormalizedRect>, VisionError>;
}

/// Produces decoded images for resource references.
pub trait ImageLoader {
    fn load(&mut self, reference: &Url) -> Result<DynamicImage, VisionError>;
}

/// Ranks known persons for a face image.
pub trait FaceClassifier {
    fn classify(&mut self, face: &DynamicImage) -> Result<Vec<PersonConfidence>, VisionError>;
}

/// Loads `file://` references from local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageLoader;

impl ImageLoader for FileImageLoader {
    fn load(&mut self, reference: &Url) -> Result<DynamicImage, VisionError> {
        if reference.scheme() != "file" {
            return Err(VisionError::UnsupportedScheme(reference.scheme().to_string()));
        }
        let path = reference
            .to_file_path()
            .map_err(|()| VisionError::NotAFilePath(reference.to_string()))?;
        load_image(&path)
    }
}

pub fn load_image(path: &Path) -> Result<DynamicImage, VisionError> {
    Ok(image::open(path)?)
}

/// Reports the whole frame as a single face, for inputs that are already crops.
#[derive(Debug, Default, Clone, Copy)]
pub struct WholeFrameDetector;

impl FaceDetector for WholeFrameDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<NormalizedRect>, VisionError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![NormalizedRect {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }])
    }
}

/// Crop every face the detector reports. Degenerate boxes are dropped.
pub fn crop_faces<D>(
    image: &DynamicImage,
    detector: &mut D,
) -> Result<Vec<CroppedFace>, VisionError>
where
    D: FaceDetector + ?Sized,
{
    let boxes = detector.detect(image)?;
    let (w, h) = (image.width(), image.height());

    let faces: Vec<CroppedFace> = boxes
        .iter()
        .map(|b| b.to_pixels(w, h))
        .filter(|r| !r.is_empty())
        .map(|rect| CroppedFace {
            image: image.crop_imm(rect.x, rect.y, rect.width, rect.height),
            rect,
        })
        .collect();

    tracing::debug!(detected = boxes.len(), cropped = faces.len(), "cropped faces");
    Ok(faces)
}

/// Crop faces and run the classifier over each one.
pub fn identify_faces<D, C>(
    image: &DynamicImage,
    detector: &mut D,
    classifier: &mut C,
) -> Result<Vec<FoundFace>, VisionError>
where
    D: FaceDetector + ?Sized,
    C: FaceClassifier + ?Sized,
{
    crop_faces(image, detector)?
        .into_iter()
        .map(|face| {
            let ranking = classifier.classify(&face.image)?;
            Ok(FoundFace::new(face, ranking))
        })
        .collect()
}
