//! Appearance embedding extraction from person crops.

use crate::error::ExtractionError;
use crate::reid::EmbeddingVector;

/// RGB pixels cut out of a frame under one detection box.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonCrop {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PersonCrop {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        let px = self.pixels.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }

    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.pixels.chunks_exact(3).map(|px| [px[0], px[1], px[2]])
    }
}

/// Turns a person crop into an appearance embedding.
///
/// Called from the blocking pool, never while the resolver lock is held.
/// Failures skip the observation.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, crop: &PersonCrop) -> Result<EmbeddingVector, ExtractionError>;
}

impl<F> EmbeddingExtractor for F
where
    F: Fn(&PersonCrop) -> Result<EmbeddingVector, ExtractionError> + Send + Sync,
{
    fn extract(&self, crop: &PersonCrop) -> Result<EmbeddingVector, ExtractionError> {
        self(crop)
    }
}

/// Per-channel colour histogram, concatenated and L2-normalised.
///
/// A cheap stand-in for a learned re-ID model: same-coloured clothing
/// lands on the same descriptor.
#[derive(Debug, Clone)]
pub struct ColorHistogramExtractor {
    dim: usize,
    bins_per_channel: usize,
}

impl ColorHistogramExtractor {
    /// Histogram producing `dim`-dimensional vectors; trailing slots stay zero.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            bins_per_channel: (dim / 3).min(256),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl EmbeddingExtractor for ColorHistogramExtractor {
    fn extract(&self, crop: &PersonCrop) -> Result<EmbeddingVector, ExtractionError> {
        if crop.is_empty() {
            return Err(ExtractionError::EmptyCrop);
        }
        if self.bins_per_channel == 0 {
            return Err(ExtractionError::Failed(format!(
                "dimension {} too small for an RGB histogram",
                self.dim
            )));
        }

        let bins = self.bins_per_channel;
        let mut histogram = vec![0.0f32; self.dim];
        for px in crop.pixels() {
            for (channel, value) in px.iter().enumerate() {
                let bin = *value as usize * bins / 256;
                histogram[channel * bins + bin] += 1.0;
            }
        }

        let norm = histogram.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(ExtractionError::EmptyCrop);
        }
        histogram.iter_mut().for_each(|v| *v /= norm);
        Ok(EmbeddingVector::new(histogram))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> PersonCrop {
        let pixels = rgb.iter().copied().cycle().take((w * h * 3) as usize).collect();
        PersonCrop::new(w, h, pixels)
    }

    #[test]
    fn same_colour_gives_identical_embedding() {
        let extractor = ColorHistogramExtractor::new(256);
        let a = extractor.extract(&solid(10, 20, [200, 30, 30])).unwrap();
        let b = extractor.extract(&solid(4, 4, [200, 30, 30])).unwrap();
        assert_eq!(a.dim(), 256);
        assert!((a.cosine_similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn different_colours_are_dissimilar() {
        let extractor = ColorHistogramExtractor::new(256);
        let red = extractor.extract(&solid(8, 8, [250, 0, 0])).unwrap();
        let blue = extractor.extract(&solid(8, 8, [0, 0, 250])).unwrap();
        assert!(red.cosine_similarity(&blue) < 0.7);
    }

    #[test]
    fn empty_crop_fails() {
        let extractor = ColorHistogramExtractor::new(256);
        assert_eq!(
            extractor.extract(&PersonCrop::new(0, 0, Vec::new())),
            Err(ExtractionError::EmptyCrop)
        );
    }

    #[test]
    fn closures_are_extractors() {
        let fixed = |_: &PersonCrop| -> Result<EmbeddingVector, ExtractionError> {
            Ok(EmbeddingVector::new(vec![1.0, 0.0]))
        };
        let v = fixed.extract(&solid(1, 1, [0, 0, 0])).unwrap();
        assert_eq!(v.dim(), 2);
    }
}
