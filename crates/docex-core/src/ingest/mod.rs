//! Text source: turns PDFs, raster images and plain-text files into [`RawDocument`]s.

pub mod ocr;
pub mod pdf;

use std::path::Path;

use image::{DynamicImage, ImageFormat};
use tracing::{debug, info, warn};

use crate::error::IngestionError;
use crate::models::config::IngestConfig;
use crate::models::document::{RawDocument, RegionConfidence};

pub use ocr::{RecognizedText, TextRecognizer};
#[cfg(feature = "native")]
pub use ocr::PureOcrEngine;
pub use pdf::PdfReader;

/// Input formats the text source accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Image(ImageFormat),
    /// UTF-8 text, e.g. a transcript produced by another OCR tool.
    PlainText,
}

impl DocumentFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, IngestionError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "txt" | "text" => Ok(DocumentFormat::PlainText),
            _ => ImageFormat::from_extension(&ext)
                .filter(|f| is_raster(*f))
                .map(DocumentFormat::Image)
                .ok_or_else(|| IngestionError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Detect the format from leading bytes.
    pub fn sniff(bytes: &[u8]) -> Result<Self, IngestionError> {
        if bytes.starts_with(b"%PDF") {
            return Ok(DocumentFormat::Pdf);
        }
        match image::guess_format(bytes) {
            Ok(format) if is_raster(format) => Ok(DocumentFormat::Image(format)),
            _ => Err(IngestionError::UnsupportedFormat(
                "unrecognized content".to_string(),
            )),
        }
    }
}

fn is_raster(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::Tiff
            | ImageFormat::Bmp
            | ImageFormat::WebP
            | ImageFormat::Gif
    )
}

/// Produces document text. OCR internals stay behind [`TextRecognizer`].
pub trait TextSource {
    fn load(&self, path: &Path) -> Result<RawDocument, IngestionError>;

    fn load_bytes(&self, bytes: &[u8], format: DocumentFormat)
    -> Result<RawDocument, IngestionError>;
}

/// File-based text source: embedded PDF text first, OCR for scans and images.
pub struct FileTextSource {
    config: IngestConfig,
    recognizer: Option<Box<dyn TextRecognizer>>,
}

impl FileTextSource {
    /// A source without OCR. Scanned documents fail with `OcrUnavailable`.
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            config: config.clone(),
            recognizer: None,
        }
    }

    /// A source with OCR loaded from `ingest.ocr_model_dir`, when configured.
    #[cfg(feature = "native")]
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestionError> {
        let source = Self::new(config);
        match &config.ocr_model_dir {
            Some(dir) => Ok(source.with_recognizer(Box::new(PureOcrEngine::from_dir(dir)?))),
            None => Ok(source),
        }
    }

    #[cfg(not(feature = "native"))]
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestionError> {
        if config.ocr_model_dir.is_some() {
            warn!("OCR models configured but this build has no OCR engine");
        }
        Ok(Self::new(config))
    }

    pub fn with_recognizer(mut self, recognizer: Box<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn has_ocr(&self) -> bool {
        self.recognizer.is_some()
    }

    fn load_pdf(&self, bytes: &[u8]) -> Result<RawDocument, IngestionError> {
        let reader = PdfReader::open(bytes)?;
        let page_count = reader.page_count();

        let embedded = match reader.text() {
            Ok(text) => text,
            Err(e) => {
                warn!("Embedded text extraction failed: {}", e);
                String::new()
            }
        };
        let embedded_len = embedded.trim().chars().count();
        debug!(
            "PDF with {} pages, {} chars of embedded text",
            page_count, embedded_len
        );

        if embedded_len >= self.config.min_text_length {
            info!("Using embedded text layer ({} pages)", page_count);
            return Ok(RawDocument {
                text: embedded,
                source_confidence: (1..=page_count)
                    .map(|page| RegionConfidence { page, score: 1.0 })
                    .collect(),
                page_count,
                document_type_hint: None,
            });
        }

        let Some(recognizer) = &self.recognizer else {
            if embedded_len > 0 {
                warn!("Short text layer and no OCR engine; using embedded text as-is");
                return Ok(RawDocument {
                    text: embedded,
                    source_confidence: vec![RegionConfidence { page: 1, score: 1.0 }],
                    page_count,
                    document_type_hint: None,
                });
            }
            return Err(IngestionError::OcrUnavailable);
        };

        let mut pages_text = Vec::new();
        let mut source_confidence = Vec::new();
        for (page, images) in reader.page_images(self.config.max_pages) {
            let mut page_text = Vec::new();
            let mut scores = Vec::new();
            for image in &images {
                let recognized = recognizer.recognize(image)?;
                if !recognized.is_empty() {
                    scores.push(recognized.confidence);
                    page_text.push(recognized.text);
                }
            }
            if !page_text.is_empty() {
                let score = scores.iter().sum::<f32>() / scores.len() as f32;
                source_confidence.push(RegionConfidence { page, score });
                pages_text.push(page_text.join("\n"));
            }
        }
        info!(
            "OCR recognized text on {} of {} pages",
            pages_text.len(),
            page_count
        );

        finish(pages_text.join("\n\n"), source_confidence, page_count)
    }

    fn load_image(&self, bytes: &[u8], format: ImageFormat) -> Result<RawDocument, IngestionError> {
        let recognizer = self
            .recognizer
            .as_ref()
            .ok_or(IngestionError::OcrUnavailable)?;
        let image: DynamicImage = image::load_from_memory_with_format(bytes, format)?;
        let recognized = recognizer.recognize(&image)?;
        info!(
            "OCR recognized {} chars (confidence: {:.2})",
            recognized.text.len(),
            recognized.confidence
        );
        finish(
            recognized.text,
            vec![RegionConfidence {
                page: 1,
                score: recognized.confidence,
            }],
            1,
        )
    }
}

fn finish(
    text: String,
    source_confidence: Vec<RegionConfidence>,
    page_count: u32,
) -> Result<RawDocument, IngestionError> {
    if text.trim().is_empty() {
        return Err(IngestionError::EmptyText);
    }
    Ok(RawDocument {
        text,
        source_confidence,
        page_count,
        document_type_hint: None,
    })
}

impl TextSource for FileTextSource {
    fn load(&self, path: &Path) -> Result<RawDocument, IngestionError> {
        let format = DocumentFormat::from_path(path)?;
        let bytes = std::fs::read(path).map_err(|source| IngestionError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        self.load_bytes(&bytes, format)
    }

    fn load_bytes(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<RawDocument, IngestionError> {
        match format {
            DocumentFormat::Pdf => self.load_pdf(bytes),
            DocumentFormat::Image(format) => self.load_image(bytes, format),
            DocumentFormat::PlainText => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                finish(text, vec![RegionConfidence { page: 1, score: 1.0 }], 1)
            }
        }
    }
}
