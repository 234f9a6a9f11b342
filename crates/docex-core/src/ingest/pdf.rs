//! PDF text and page-image extraction using lopdf and pdf-extract.

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace};

use crate::error::PdfError;

/// A loaded PDF.
pub struct PdfReader {
    document: Document,
    /// Decrypted bytes, as handed to pdf-extract.
    raw_data: Vec<u8>,
}

impl PdfReader {
    /// Parse a PDF. Documents encrypted with an empty user password are decrypted.
    pub fn open(data: &[u8]) -> Result<Self, PdfError> {
        let mut document = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        let raw_data = if document.is_encrypted() {
            if document.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");
            let mut decrypted = Vec::new();
            document
                .save_to(&mut decrypted)
                .map_err(|e| PdfError::Parse(format!("failed to save decrypted PDF: {}", e)))?;
            decrypted
        } else {
            data.to_vec()
        };

        if document.get_pages().is_empty() {
            return Err(PdfError::NoPages);
        }

        Ok(Self { document, raw_data })
    }

    pub fn page_count(&self) -> u32 {
        self.document.get_pages().len() as u32
    }

    /// Embedded text of the whole document.
    pub fn text(&self) -> Result<String, PdfError> {
        pdf_extract::extract_text_from_mem(&self.raw_data)
            .map_err(|e| PdfError::TextExtraction(e.to_string()))
    }

    /// Images drawn on each page, for the first `max_pages` pages (0 = all).
    pub fn page_images(&self, max_pages: usize) -> Vec<(u32, Vec<DynamicImage>)> {
        let limit = if max_pages == 0 { usize::MAX } else { max_pages };
        self.document
            .get_pages()
            .into_iter()
            .take(limit)
            .map(|(number, page_id)| (number, self.images_on_page(page_id)))
            .collect()
    }

    fn images_on_page(&self, page_id: ObjectId) -> Vec<DynamicImage> {
        let doc = &self.document;
        let Some(resources) = page_resources(doc, page_id) else {
            return Vec::new();
        };
        let Ok(xobjects) = resources.get(b"XObject") else {
            return Vec::new();
        };
        let Ok((_, Object::Dictionary(xobjects))) = doc.dereference(xobjects) else {
            return Vec::new();
        };

        let images: Vec<DynamicImage> = xobjects
            .iter()
            .filter_map(|(_, obj)| doc.dereference(obj).ok())
            .filter_map(|(_, obj)| decode_image(doc, obj))
            .collect();
        trace!("Page object {:?}: {} images", page_id, images.len());
        images
    }
}

/// Resources of a page, inherited from the page tree when not set on the page.
fn page_resources(doc: &Document, mut node_id: ObjectId) -> Option<Dictionary> {
    loop {
        let Object::Dictionary(dict) = doc.get_object(node_id).ok()? else {
            return None;
        };
        if let Ok(resources) = dict.get(b"Resources") {
            if let Ok((_, Object::Dictionary(res))) = doc.dereference(resources) {
                return Some(res.clone());
            }
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => node_id = *parent,
            _ => return None,
        }
    }
}

/// Decode an image XObject. JPEG streams and raw 8-bit RGB or gray data are supported.
fn decode_image(doc: &Document, obj: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;
    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }
    let width = dict.get(b"Width").ok()?.as_i64().ok()? as u32;
    let height = dict.get(b"Height").ok()?.as_i64().ok()? as u32;

    let filter = dict.get(b"Filter").ok().and_then(|f| match f {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
        _ => None,
    });
    match filter {
        Some(b"DCTDecode") => {
            return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
                .ok();
        }
        Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
            trace!("Skipping image with unsupported filter");
            return None;
        }
        _ => {}
    }

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }

    let color_space = dict.get(b"ColorSpace").ok().and_then(|o| match o {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
        Object::Reference(r) => doc.get_object(*r).ok().and_then(|o| o.as_name().ok()),
        _ => None,
    });
    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let pixels = (width as usize) * (height as usize);

    match color_space.unwrap_or(b"DeviceRGB") {
        b"DeviceRGB" | b"RGB" if data.len() >= pixels * 3 => {
            RgbImage::from_raw(width, height, data[..pixels * 3].to_vec())
                .map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" if data.len() >= pixels => {
            GrayImage::from_raw(width, height, data[..pixels].to_vec())
                .map(DynamicImage::ImageLuma8)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_parse_error() {
        let err = PdfReader::open(b"definitely not a pdf").err().unwrap();
        assert!(matches!(err, PdfError::Parse(_)));
    }

    #[test]
    fn test_decode_raw_gray_image() {
        let mut dict = Dictionary::new();
        dict.set("Subtype", Object::Name(b"Image".to_vec()));
        dict.set("Width", Object::Integer(2));
        dict.set("Height", Object::Integer(2));
        dict.set("ColorSpace", Object::Name(b"DeviceGray".to_vec()));
        dict.set("BitsPerComponent", Object::Integer(8));
        let stream = Object::Stream(lopdf::Stream::new(dict, vec![0, 64, 128, 255]));

        let doc = Document::with_version("1.5");
        let img = decode_image(&doc, &stream).unwrap();
        assert_eq!((img.width(), img.height()), (2, 2));
    }

    #[test]
    fn test_non_image_stream_ignored() {
        let mut dict = Dictionary::new();
        dict.set("Subtype", Object::Name(b"Form".to_vec()));
        let stream = Object::Stream(lopdf::Stream::new(dict, Vec::new()));
        let doc = Document::with_version("1.5");
        assert!(decode_image(&doc, &stream).is_none());
    }
}
