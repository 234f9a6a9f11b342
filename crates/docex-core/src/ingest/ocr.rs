//! Text recognition for scanned pages and raster images.

use image::DynamicImage;

use crate::error::OcrError;

/// Text recognized on one image.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    /// Lines in reading order, joined by newlines.
    pub text: String,
    /// Mean recognition confidence over all regions (0.0 - 1.0).
    pub confidence: f32,
}

impl RecognizedText {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Black-box OCR engine: image in, text and confidence out.
pub trait TextRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<RecognizedText, OcrError>;
}

/// A recognized region before reading-order sorting.
#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "native"), allow(dead_code))]
pub(crate) struct Region {
    pub text: String,
    pub confidence: f32,
    /// Top-left corner of the axis-aligned bounding box.
    pub x: f32,
    pub y: f32,
}

/// Row height used to group regions into lines, in pixels.
const ROW_HEIGHT: f32 = 20.0;

/// Sort regions top-to-bottom, then left-to-right within a row, and join them.
#[cfg_attr(not(feature = "native"), allow(dead_code))]
pub(crate) fn assemble(mut regions: Vec<Region>) -> RecognizedText {
    regions.sort_by(|a, b| {
        let row_a = (a.y / ROW_HEIGHT) as i32;
        let row_b = (b.y / ROW_HEIGHT) as i32;
        row_a
            .cmp(&row_b)
            .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let confidence = if regions.is_empty() {
        0.0
    } else {
        regions.iter().map(|r| r.confidence).sum::<f32>() / regions.len() as f32
    };
    let text = regions
        .iter()
        .map(|r| r.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    RecognizedText { text, confidence }
}

#[cfg(feature = "native")]
pub use native::PureOcrEngine;

#[cfg(feature = "native")]
mod native {
    use std::path::Path;
    use std::time::Instant;

    use image::{DynamicImage, GenericImageView};
    use tracing::{debug, info};

    use super::{Region, RecognizedText, TextRecognizer, assemble};
    use crate::error::OcrError;

    /// OCR engine backed by `pure-onnx-ocr`.
    pub struct PureOcrEngine {
        engine: pure_onnx_ocr::engine::OcrEngine,
    }

    impl PureOcrEngine {
        /// Load `det.onnx`, `latin_rec.onnx` and `latin_dict.txt` from `model_dir`.
        pub fn from_dir(model_dir: &Path) -> Result<Self, OcrError> {
            let det_path = model_dir.join("det.onnx");
            let rec_path = model_dir.join("latin_rec.onnx");
            let dict_path = model_dir.join("latin_dict.txt");

            let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
                .det_model_path(&det_path)
                .rec_model_path(&rec_path)
                .dictionary_path(&dict_path)
                .build()
                .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)))?;

            info!("Loaded OCR models from {}", model_dir.display());
            Ok(Self { engine })
        }
    }

    impl TextRecognizer for PureOcrEngine {
        fn recognize(&self, image: &DynamicImage) -> Result<RecognizedText, OcrError> {
            let start = Instant::now();
            let (width, height) = image.dimensions();

            let results = self
                .engine
                .run_from_image(image)
                .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

            let regions: Vec<Region> = results
                .iter()
                .map(|r| {
                    let (x, y) = top_left(&r.bounding_box);
                    Region {
                        text: r.text.replace("[UNK]", " "),
                        confidence: r.confidence,
                        x,
                        y,
                    }
                })
                .collect();

            debug!(
                "OCR on {}x{} image: {} regions in {}ms",
                width,
                height,
                regions.len(),
                start.elapsed().as_millis()
            );
            Ok(assemble(regions))
        }
    }

    fn top_left(polygon: &pure_onnx_ocr::Polygon<f64>) -> (f32, f32) {
        polygon
            .exterior()
            .coords()
            .fold((f32::INFINITY, f32::INFINITY), |(x, y), c| {
                (x.min(c.x as f32), y.min(c.y as f32))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(text: &str, x: f32, y: f32, confidence: f32) -> Region {
        Region {
            text: text.to_string(),
            confidence,
            x,
            y,
        }
    }

    #[test]
    fn test_assemble_reading_order() {
        let out = assemble(vec![
            region("Total: 90.00", 10.0, 205.0, 0.8),
            region("INVOICE", 10.0, 12.0, 0.9),
            region("INV-7", 300.0, 8.0, 1.0),
        ]);
        assert_eq!(out.text, "INVOICE\nINV-7\nTotal: 90.00");
        assert!((out.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_assemble_empty() {
        let out = assemble(Vec::new());
        assert!(out.is_empty());
        assert_eq!(out.confidence, 0.0);
    }
}
