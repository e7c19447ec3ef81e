//! Print PDF writer: one full-bleed raster image per page.

use image::ImageFormat;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// One page image with the bleed it carries on every side.
#[derive(Debug, Clone, Copy)]
pub struct PdfPageImage<'a> {
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: f64,
    pub bleed_px: f64,
    pub format: ImageFormat,
    pub bytes: &'a [u8],
}

impl PdfPageImage<'_> {
    fn to_points(&self, px: f64) -> f64 {
        px * 72.0 / self.dpi
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("No pages to write")]
    Empty,

    #[error("Failed to decode page image {index}: {message}")]
    Image { index: usize, message: String },

    #[error("Failed to write PDF: {0}")]
    Write(String),
}

/// Writes `pages` in order into a single PDF.
///
/// Each page's MediaBox covers the full image. TrimBox is inset by the bleed
/// and BleedBox equals the MediaBox.
pub fn build_print_pdf(pages: &[PdfPageImage<'_>]) -> Result<Vec<u8>, PdfError> {
    if pages.is_empty() {
        return Err(PdfError::Empty);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for (index, page) in pages.iter().enumerate() {
        let page_id = add_page(&mut doc, pages_id, index, page)?;
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfError::Write(e.to_string()))?;
    Ok(buffer)
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    index: usize,
    page: &PdfPageImage<'_>,
) -> Result<ObjectId, PdfError> {
    let image_stream = image_xobject(index, page)?;
    let image_id = doc.add_object(Object::Stream(image_stream));

    let width_pt = page.to_points(page.width_px as f64);
    let height_pt = page.to_points(page.height_px as f64);
    let bleed_pt = page.to_points(page.bleed_px);

    let content = format!("q\n{:.4} 0 0 {:.4} 0 0 cm\n/Im0 Do\nQ\n", width_pt, height_pt);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let media_box = rect(0.0, 0.0, width_pt, height_pt);
    let trim_box = rect(bleed_pt, bleed_pt, width_pt - bleed_pt, height_pt - bleed_pt);

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box.clone(),
        "BleedBox" => media_box,
        "TrimBox" => trim_box,
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        },
        "Contents" => content_id,
    }))
}

fn image_xobject(index: usize, page: &PdfPageImage<'_>) -> Result<Stream, PdfError> {
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => page.width_px as i64,
        "Height" => page.height_px as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };

    if page.format == ImageFormat::Jpeg {
        let mut dict = dict;
        dict.set("Filter", "DCTDecode");
        // Already compressed; keep the DCT data as is.
        return Ok(Stream::new(dict, page.bytes.to_vec()).with_compression(false));
    }

    let rgb = image::load_from_memory_with_format(page.bytes, page.format)
        .map_err(|e| PdfError::Image {
            index,
            message: e.to_string(),
        })?
        .to_rgb8();
    Ok(Stream::new(dict, rgb.into_raw()))
}

fn rect(llx: f64, lly: f64, urx: f64, ury: f64) -> Vec<Object> {
    [llx, lly, urx, ury]
        .into_iter()
        .map(|v| Object::Real(v as f32))
        .collect()
}
