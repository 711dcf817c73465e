//! PDF first-page renderer.
//!
//! The first page is rasterized by pdfium at the size given by [`fit_page`],
//! on a white background. pdfium is bound once per thread; the library is
//! looked up through `SHELF_COVER_PDFIUM_LIB`, next to the executable, in the
//! working directory, then on the system search path. Setting
//! `SHELF_COVER_DISABLE_PDFIUM` skips it.
//!
//! Without pdfium, a fallback built on lopdf paints the image XObjects the
//! page content draws (directly or through form XObjects). Scanned books and
//! comic PDFs carry their cover as such an image. Text and vector paths are
//! not drawn, so a page with no paintable image gives no cover at all.

use crate::error::{AppError, Result};
use crate::formats::{CoverBounds, CoverHandler};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, Stream};
use pdfium_render::prelude::{PdfBitmapFormat, PdfColor, PdfRenderConfig, Pdfium};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// Path of the pdfium shared library to bind.
pub const PDFIUM_LIB_ENV: &str = "SHELF_COVER_PDFIUM_LIB";

/// Any value other than empty, `0` or `false` disables pdfium.
pub const DISABLE_PDFIUM_ENV: &str = "SHELF_COVER_DISABLE_PDFIUM";

/// Letter size in points, used when no page declares a MediaBox.
const DEFAULT_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

/// Limit on `Parent` hops when resolving inherited page attributes.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Images drawn larger than this multiple of the canvas are skipped.
const MAX_OVERDRAW: f64 = 4.0;

/// Limit on nested form XObjects.
const MAX_FORM_DEPTH: usize = 8;

/// Handler for PDF files.
pub struct PdfHandler;

/// Fit a page into `bounds`, preserving its aspect ratio.
///
/// A page relatively wider than the box takes the full width; any other page
/// takes the full height.
pub fn fit_page(page_width: f64, page_height: f64, bounds: CoverBounds) -> (u32, u32) {
    let max_w = f64::from(bounds.max_width);
    let max_h = f64::from(bounds.max_height);

    if page_width * max_h > page_height * max_w {
        let height = (max_w * page_height / page_width).round();
        (bounds.max_width, clamp_dimension(height, bounds.max_height))
    } else {
        let width = (max_h * page_width / page_height).round();
        (clamp_dimension(width, bounds.max_width), bounds.max_height)
    }
}

fn clamp_dimension(value: f64, bound: u32) -> u32 {
    if value.is_finite() {
        (value as u32).clamp(1, bound)
    } else {
        1
    }
}

/// Affine transform `[a b c d e f]` as used by the `cm` operator.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() != 6 {
            return None;
        }
        let mut values = [0.0; 6];
        for (slot, operand) in values.iter_mut().zip(operands) {
            *slot = number(operand)?;
        }
        Some(Matrix(values))
    }

    /// `self` applied first, then `outer`.
    fn then(&self, outer: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [oa, ob, oc, od, oe, of] = outer.0;
        Matrix([
            a * oa + b * oc,
            a * ob + b * od,
            c * oa + d * oc,
            c * ob + d * od,
            e * oa + f * oc + oe,
            e * ob + f * od + of,
        ])
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }
}

/// Unrotated page box in user space.
#[derive(Debug, Clone, Copy)]
struct PageBox {
    left: f64,
    bottom: f64,
    width: f64,
    height: f64,
}

impl PdfHandler {
    /// Paint the image content of the first page into `bounds`.
    ///
    /// Used when pdfium is not available. Only image XObjects (including
    /// those nested in form XObjects) are drawn, so a page where nothing
    /// could be painted yields `None` rather than a blank sheet.
    pub fn paint_first_page(doc: &Document, bounds: CoverBounds) -> Result<Option<RgbImage>> {
        let pages = doc.get_pages();
        let Some(&page_id) = pages.values().next() else {
            return Ok(None);
        };

        let page = doc.get_dictionary(page_id)?;
        let page_box = page_box(doc, page);
        let rotation = inherited(doc, page, b"Rotate")
            .and_then(number)
            .map(|r| (r as i64).rem_euclid(360))
            .unwrap_or(0);
        let quarter_turn = rotation == 90 || rotation == 270;

        let (shown_w, shown_h) = if quarter_turn {
            (page_box.height, page_box.width)
        } else {
            (page_box.width, page_box.height)
        };
        let (width, height) = fit_page(shown_w, shown_h, bounds);
        let (canvas_w, canvas_h) = if quarter_turn {
            (height, width)
        } else {
            (width, height)
        };

        let mut painter = Painter {
            doc,
            page_box,
            canvas: RgbImage::from_pixel(canvas_w, canvas_h, Rgb([255, 255, 255])),
            painted: 0,
        };
        let resources = inherited(doc, page, b"Resources").and_then(|r| as_dict(doc, r));
        let content = doc.get_page_content(page_id)?;
        if let Err(e) = painter.paint_content(&content, resources, Matrix::IDENTITY, 0) {
            tracing::debug!(error = %e, "Could not interpret PDF page content");
        }

        if painter.painted == 0 {
            tracing::debug!("No drawable images on first PDF page");
            return Ok(None);
        }
        tracing::trace!(painted = painter.painted, "Painted PDF page images");

        let canvas = painter.canvas;
        let rendered = match rotation {
            90 => imageops::rotate90(&canvas),
            180 => imageops::rotate180(&canvas),
            270 => imageops::rotate270(&canvas),
            _ => canvas,
        };

        Ok(Some(rendered))
    }
}

/// Content-stream walker for the image fallback.
struct Painter<'a> {
    doc: &'a Document,
    page_box: PageBox,
    canvas: RgbImage,
    painted: usize,
}

impl<'a> Painter<'a> {
    /// Interpret `q`, `Q`, `cm` and `Do`, drawing images and descending into forms.
    fn paint_content(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        base: Matrix,
        depth: usize,
    ) -> Result<()> {
        let doc = self.doc;
        let Some(xobjects) = resources
            .and_then(|r| r.get(b"XObject").ok())
            .and_then(|x| as_dict(doc, x))
        else {
            return Ok(());
        };

        let content = Content::decode(content)?;

        let mut ctm = base;
        let mut saved = Vec::new();

        for op in &content.operations {
            match op.operator.as_str() {
                "q" => saved.push(ctm),
                "Q" => {
                    if let Some(previous) = saved.pop() {
                        ctm = previous;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(&op.operands) {
                        ctm = m.then(&ctm);
                    }
                }
                "Do" => {
                    let Some(Object::Name(name)) = op.operands.first() else {
                        continue;
                    };
                    let Some(stream) = xobjects
                        .get(name)
                        .ok()
                        .and_then(|obj| resolve(doc, obj))
                        .and_then(|obj| obj.as_stream().ok())
                    else {
                        continue;
                    };
                    self.draw_xobject(stream, resources, &ctm, depth);
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn draw_xobject(
        &mut self,
        stream: &'a Stream,
        resources: Option<&'a Dictionary>,
        ctm: &Matrix,
        depth: usize,
    ) {
        let subtype = stream.dict.get(b"Subtype").ok().and_then(|s| s.as_name().ok());

        match subtype {
            Some(b"Image") => {
                if let Some(image) = decode_image_xobject(stream)
                    && paint(&mut self.canvas, &image, ctm, self.page_box)
                {
                    self.painted += 1;
                }
            }
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                let doc = self.doc;
                let matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|m| resolve(doc, m))
                    .and_then(|m| m.as_array().ok())
                    .and_then(|values| Matrix::from_operands(values))
                    .unwrap_or(Matrix::IDENTITY);
                // Forms without their own resources use the enclosing ones.
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|r| as_dict(doc, r))
                    .or(resources);

                let Some(content) = stream_bytes(stream) else {
                    return;
                };
                if let Err(e) =
                    self.paint_content(&content, form_resources, matrix.then(ctm), depth + 1)
                {
                    tracing::debug!(error = %e, "Could not interpret PDF form content");
                }
            }
            _ => {}
        }
    }
}

/// Draw `image` into the canvas rectangle covered by the unit square under `ctm`.
fn paint(canvas: &mut RgbImage, image: &RgbImage, ctm: &Matrix, page_box: PageBox) -> bool {
    let corners = [
        ctm.apply(0.0, 0.0),
        ctm.apply(1.0, 0.0),
        ctm.apply(0.0, 1.0),
        ctm.apply(1.0, 1.0),
    ];
    let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

    let scale_x = f64::from(canvas.width()) / page_box.width;
    let scale_y = f64::from(canvas.height()) / page_box.height;

    // Page space grows upwards, the canvas grows downwards.
    let left = (min_x - page_box.left) * scale_x;
    let top = (page_box.bottom + page_box.height - max_y) * scale_y;
    let dest_w = ((max_x - min_x) * scale_x).round();
    let dest_h = ((max_y - min_y) * scale_y).round();

    if !(dest_w >= 1.0 && dest_h >= 1.0)
        || dest_w > f64::from(canvas.width()) * MAX_OVERDRAW
        || dest_h > f64::from(canvas.height()) * MAX_OVERDRAW
    {
        return false;
    }

    let [a, _, _, d, _, _] = ctm.0;
    let mut placed = imageops::resize(image, dest_w as u32, dest_h as u32, FilterType::Triangle);
    if a < 0.0 {
        imageops::flip_horizontal_in_place(&mut placed);
    }
    if d < 0.0 {
        imageops::flip_vertical_in_place(&mut placed);
    }

    imageops::overlay(canvas, &placed, left.round() as i64, top.round() as i64);
    true
}

/// Decode an image XObject into RGB pixels.
fn decode_image_xobject(stream: &Stream) -> Option<RgbImage> {
    let is_image = matches!(
        stream.dict.get(b"Subtype"),
        Ok(Object::Name(n)) if n == b"Image"
    );
    if !is_image {
        return None;
    }

    let filters = filter_names(&stream.dict);

    if filters.iter().any(|f| f == b"DCTDecode") {
        let data = if filters.len() == 1 {
            stream.content.clone()
        } else {
            stream.decompressed_content().ok()?
        };
        return image::load_from_memory(&data).ok().map(|img| img.into_rgb8());
    }

    let samples = stream_bytes(stream)?;

    let width = stream.dict.get(b"Width").ok().and_then(number)? as u32;
    let height = stream.dict.get(b"Height").ok().and_then(number)? as u32;
    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(number)
        .unwrap_or(8.0);
    if bits != 8.0 || width == 0 || height == 0 {
        return None;
    }

    let pixels = (width as usize).checked_mul(height as usize)?;
    let components = samples.len() / pixels;

    match components {
        1 => GrayImage::from_raw(width, height, samples[..pixels].to_vec())
            .map(|gray| DynamicImage::ImageLuma8(gray).into_rgb8()),
        3 => RgbImage::from_raw(width, height, samples[..pixels * 3].to_vec()),
        4 => {
            let rgb = samples[..pixels * 4]
                .chunks_exact(4)
                .flat_map(|cmyk| {
                    let k = u16::from(cmyk[3]);
                    [0, 1, 2].map(|i| 255u16.saturating_sub(u16::from(cmyk[i]) + k) as u8)
                })
                .collect();
            RgbImage::from_raw(width, height, rgb)
        }
        _ => None,
    }
}

fn filter_names(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![n.clone()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|item| match item {
                Object::Name(n) => Some(n.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Stream data with its filters undone.
fn stream_bytes(stream: &Stream) -> Option<Vec<u8>> {
    if filter_names(&stream.dict).is_empty() {
        Some(stream.content.clone())
    } else {
        stream.decompressed_content().ok()
    }
}

/// MediaBox of the page, falling back to Letter.
fn page_box(doc: &Document, page: &Dictionary) -> PageBox {
    let coords: Option<Vec<f64>> = inherited(doc, page, b"MediaBox")
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
        .map(|arr| arr.iter().filter_map(number).collect());

    match coords.as_deref() {
        Some([x0, y0, x1, y1]) if (x1 - x0).abs() > 0.0 && (y1 - y0).abs() > 0.0 => PageBox {
            left: x0.min(*x1),
            bottom: y0.min(*y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        },
        _ => PageBox {
            left: 0.0,
            bottom: 0.0,
            width: DEFAULT_PAGE_SIZE.0,
            height: DEFAULT_PAGE_SIZE.1,
        },
    }
}

/// Look up a page attribute, following `Parent` links for inheritable keys.
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn as_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj)?.as_dict().ok()
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

enum PdfiumState {
    Uninitialized,
    Available(Pdfium),
    Unavailable,
}

thread_local! {
    static PDFIUM: RefCell<PdfiumState> = const { RefCell::new(PdfiumState::Uninitialized) };
}

fn pdfium_disabled() -> bool {
    std::env::var(DISABLE_PDFIUM_ENV)
        .map(|v| !matches!(v.trim(), "" | "0" | "false"))
        .unwrap_or(false)
}

/// Run `f` with this thread's pdfium binding, or return `None` if there is none.
fn with_pdfium<T>(f: impl FnOnce(&Pdfium) -> T) -> Option<T> {
    if pdfium_disabled() {
        return None;
    }

    PDFIUM.with(|cell| {
        let mut state = cell.borrow_mut();
        if matches!(*state, PdfiumState::Uninitialized) {
            *state = match bind_pdfium() {
                Ok(pdfium) => PdfiumState::Available(pdfium),
                Err(e) => {
                    tracing::debug!(error = %e, "pdfium unavailable, painting page images instead");
                    PdfiumState::Unavailable
                }
            };
        }

        match &*state {
            PdfiumState::Available(pdfium) => Some(f(pdfium)),
            _ => None,
        }
    })
}

fn bind_pdfium() -> Result<Pdfium> {
    if let Ok(path) = std::env::var(PDFIUM_LIB_ENV) {
        let path = PathBuf::from(path);
        let bindings = Pdfium::bind_to_library(&path).map_err(pdf_error)?;
        return Ok(Pdfium::new(bindings));
    }

    let mut dirs = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        dirs.push(dir.to_path_buf());
    }
    dirs.push(PathBuf::from("."));

    for dir in &dirs {
        let candidate = Pdfium::pdfium_platform_library_name_at_path(dir);
        if let Ok(bindings) = Pdfium::bind_to_library(&candidate) {
            tracing::debug!(path = %candidate.display(), "Bound pdfium");
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(pdf_error)?;
    Ok(Pdfium::new(bindings))
}

fn pdf_error(e: impl std::fmt::Display) -> AppError {
    AppError::Pdf(e.to_string())
}

/// Render the first page with pdfium, fitted into `bounds` on white.
fn render_with_pdfium(
    pdfium: &Pdfium,
    path: &Path,
    bounds: CoverBounds,
) -> Result<Option<RgbImage>> {
    let document = pdfium.load_pdf_from_file(path, None).map_err(pdf_error)?;
    let pages = document.pages();
    if pages.len() == 0 {
        return Ok(None);
    }

    let page = pages.get(0).map_err(pdf_error)?;
    let (width, height) = fit_page(
        f64::from(page.width().value),
        f64::from(page.height().value),
        bounds,
    );

    let config = PdfRenderConfig::new()
        .set_target_width(width as i32)
        .set_maximum_width(width as i32)
        .set_maximum_height(height as i32)
        .set_clear_color(PdfColor::WHITE)
        .render_form_data(false)
        .render_annotations(false)
        .set_format(PdfBitmapFormat::BGRA);

    let bitmap = page.render_with_config(&config).map_err(pdf_error)?;
    let bitmap_w = u32::try_from(bitmap.width()).unwrap_or(0);
    let bitmap_h = u32::try_from(bitmap.height()).unwrap_or(0);

    bgra_to_rgb(bitmap_w, bitmap_h, &bitmap.as_raw_bytes())
        .map(Some)
        .ok_or_else(|| AppError::Pdf("pdfium returned an empty bitmap".to_string()))
}

/// Repack BGRA rows (possibly padded) into RGB.
fn bgra_to_rgb(width: u32, height: u32, bytes: &[u8]) -> Option<RgbImage> {
    if width == 0 || height == 0 {
        return None;
    }
    let row_len = width as usize * 4;
    let stride = bytes.len() / height as usize;
    if stride < row_len {
        return None;
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for row in bytes.chunks_exact(stride).take(height as usize) {
        for px in row[..row_len].chunks_exact(4) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }

    RgbImage::from_raw(width, height, rgb)
}

impl CoverHandler for PdfHandler {
    fn extract_cover(&self, path: &Path, bounds: CoverBounds) -> Result<Option<RgbImage>> {
        if let Some(rendered) = with_pdfium(|pdfium| render_with_pdfium(pdfium, path, bounds)) {
            return rendered;
        }

        let doc = Document::load(path)?;
        Self::paint_first_page(&doc, bounds)
    }
}
