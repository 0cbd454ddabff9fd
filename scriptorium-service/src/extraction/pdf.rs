//! PDF figure harvesting and page rasterization.
//!
//! Embedded images are read through PDFium page objects. Images whose
//! placements overlap (artwork layered with drop shadows, split scans) are
//! grouped with union-find and composited back-to-front into a single
//! raster, so one visual figure yields one attachment.

use std::path::Path;

use image::RgbaImage;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use crate::error::{ProcessingError, ServiceResult};

/// Rectangle in PDF points, bottom-left origin
#[derive(Debug, Clone, Copy)]
pub(super) struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }
}

/// One placed image object on a page
struct FigureLayer {
    /// Content-stream position; later objects paint in front
    object_index: usize,
    area: Rect,
    image: RgbaImage,
}

/// A composited figure ready for the persistence policy
pub(super) struct HarvestedFigure {
    pub image: RgbaImage,
    pub page_number: i32,
    pub index_on_page: i32,
}

/// Create a new Pdfium instance (dynamically linked)
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
pub(super) fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::DocumentParse {
            source: Box::new(std::io::Error::other(format!(
                "Failed to load PDFium library; install libpdfium or place it next to the binary: {:?}",
                e
            ))),
        })?;

    Ok(Pdfium::new(bindings))
}

pub(super) fn load_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
) -> Result<PdfDocument<'a>, ProcessingError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ProcessingError::DocumentParse {
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to load PDF: {:?}", e),
            )),
        })
}

/// Extract all embedded images, composited per overlap group and ordered by
/// page then position on the page.
pub(super) fn harvest_embedded_images(
    pdfium: &Pdfium,
    path: &Path,
) -> ServiceResult<Vec<HarvestedFigure>> {
    let document = load_document(pdfium, path)?;

    let mut figures = Vec::new();

    for (page_index, page) in document.pages().iter().enumerate() {
        let page_number = page_index as i32 + 1;
        let mut layers: Vec<FigureLayer> = Vec::new();

        for (object_index, object) in page.objects().iter().enumerate() {
            let Some(image_object) = object.as_image_object() else {
                continue;
            };

            let Some(area) = object_bounds(&object) else {
                debug!(page = page_number, object = object_index, "Image without bounds");
                continue;
            };

            // The processed variant applies transparency masks and filters;
            // fall back to the raw stream if PDFium cannot process it.
            let decoded = image_object
                .get_processed_image(&document)
                .or_else(|_| image_object.get_raw_image());

            let image = match decoded {
                Ok(img) => img.to_rgba8(),
                Err(e) => {
                    debug!(
                        page = page_number,
                        object = object_index,
                        error = ?e,
                        "Could not decode embedded image"
                    );
                    continue;
                }
            };

            if image.width() == 0 || image.height() == 0 {
                continue;
            }

            layers.push(FigureLayer {
                object_index,
                area,
                image,
            });
        }

        if layers.is_empty() {
            continue;
        }

        let groups = group_by_overlap(&layers);

        debug!(
            page = page_number,
            images = layers.len(),
            groups = groups.len(),
            "Grouped page images into composites"
        );

        for (group_index, group) in groups.iter().enumerate() {
            match composite_group(&layers, group) {
                Some(image) => figures.push(HarvestedFigure {
                    image,
                    page_number,
                    index_on_page: group_index as i32,
                }),
                None => {
                    warn!(
                        page = page_number,
                        group = group_index,
                        "Failed to composite image group"
                    );
                }
            }
        }
    }

    figures.sort_by(|a, b| {
        a.page_number
            .cmp(&b.page_number)
            .then(a.index_on_page.cmp(&b.index_on_page))
    });

    Ok(figures)
}

/// Render a full page to an RGBA raster at the given DPI
pub(super) fn render_page_raster(page: &PdfPage<'_>, dpi: f64) -> Result<RgbaImage, ProcessingError> {
    let pixels_per_point = dpi / 72.0;
    let width = (page.width().value as f64 * pixels_per_point).ceil() as i32;
    let height = (page.height().value as f64 * pixels_per_point).ceil() as i32;

    let config = PdfRenderConfig::new()
        .set_target_width(width)
        .set_target_height(height);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| ProcessingError::DocumentParse {
            source: Box::new(std::io::Error::other(format!(
                "Failed to render page: {:?}",
                e
            ))),
        })?;

    Ok(bitmap.as_image().to_rgba8())
}

/// Bounds of a page object in PDF points
pub(super) fn object_bounds(object: &PdfPageObject<'_>) -> Option<Rect> {
    let bounds = object.bounds().ok()?;
    Some(Rect {
        x1: bounds.left().value as f64,
        y1: bounds.bottom().value as f64,
        x2: bounds.right().value as f64,
        y2: bounds.top().value as f64,
    })
}

/// Check if two rectangles overlap by more than a threshold fraction of the
/// smaller one
fn rectangles_overlap(a: &Rect, b: &Rect, threshold: f64) -> bool {
    let x_overlap = f64::max(0.0, f64::min(a.x2, b.x2) - f64::max(a.x1, b.x1));
    let y_overlap = f64::max(0.0, f64::min(a.y2, b.y2) - f64::max(a.y1, b.y1));
    let overlap_area = x_overlap * y_overlap;
    let smaller_area = a.area().min(b.area());
    if smaller_area <= 0.0 {
        return false;
    }
    overlap_area / smaller_area > threshold
}

/// Group layers by overlapping bounding boxes using union-find
fn group_by_overlap(layers: &[FigureLayer]) -> Vec<Vec<usize>> {
    if layers.is_empty() {
        return Vec::new();
    }

    let n = layers.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], i: usize) -> usize {
        if parent[i] != i {
            parent[i] = find(parent, parent[i]);
        }
        parent[i]
    }

    fn union(parent: &mut [usize], i: usize, j: usize) {
        let pi = find(parent, i);
        let pj = find(parent, j);
        if pi != pj {
            parent[pi] = pj;
        }
    }

    const OVERLAP_THRESHOLD: f64 = 0.7;
    for i in 0..n {
        for j in (i + 1)..n {
            if rectangles_overlap(&layers[i].area, &layers[j].area, OVERLAP_THRESHOLD) {
                union(&mut parent, i, j);
            }
        }
    }

    let mut groups: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }

    // Sort groups by position on the page: top to bottom (PDF y grows
    // upward), then left to right
    let mut result: Vec<Vec<usize>> = groups.into_values().collect();
    result.sort_by(|a, b| {
        let top = |indices: &[usize]| {
            indices
                .iter()
                .map(|&i| layers[i].area.y2)
                .fold(f64::MIN, f64::max)
        };
        let left = |indices: &[usize]| {
            indices
                .iter()
                .map(|&i| layers[i].area.x1)
                .fold(f64::MAX, f64::min)
        };
        top(b)
            .partial_cmp(&top(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                left(a)
                    .partial_cmp(&left(b))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    result
}

/// Bounding box encompassing all layers in a group
fn group_bounds(layers: &[FigureLayer], indices: &[usize]) -> Rect {
    let mut bounds = Rect {
        x1: f64::MAX,
        y1: f64::MAX,
        x2: f64::MIN,
        y2: f64::MIN,
    };

    for &idx in indices {
        let area = &layers[idx].area;
        bounds.x1 = bounds.x1.min(area.x1).min(area.x2);
        bounds.y1 = bounds.y1.min(area.y1).min(area.y2);
        bounds.x2 = bounds.x2.max(area.x1).max(area.x2);
        bounds.y2 = bounds.y2.max(area.y1).max(area.y2);
    }

    bounds
}

/// Composite a group of overlapping layers into a single image.
///
/// The canvas is sized to the union of bounding boxes at the highest
/// available resolution (max pixels-per-point in the group); each layer is
/// scaled to fill its own box at canvas resolution and painted back-to-front
/// in content-stream order.
fn composite_group(layers: &[FigureLayer], indices: &[usize]) -> Option<RgbaImage> {
    if indices.is_empty() {
        return None;
    }

    if indices.len() == 1 {
        return Some(layers[indices[0]].image.clone());
    }

    let scale_of = |layer: &FigureLayer| {
        let sx = if layer.area.width() > 0.0 {
            layer.image.width() as f64 / layer.area.width()
        } else {
            1.0
        };
        let sy = if layer.area.height() > 0.0 {
            layer.image.height() as f64 / layer.area.height()
        } else {
            1.0
        };
        sx.max(sy)
    };

    let max_scale = indices
        .iter()
        .map(|&i| scale_of(&layers[i]))
        .fold(0.0_f64, f64::max);

    if max_scale <= 0.0 {
        return None;
    }

    let bounds = group_bounds(layers, indices);
    let canvas_width = (bounds.width() * max_scale).ceil() as u32;
    let canvas_height = (bounds.height() * max_scale).ceil() as u32;

    if canvas_width == 0 || canvas_height == 0 {
        return None;
    }

    let mut canvas = RgbaImage::new(canvas_width, canvas_height);

    let mut sorted_indices = indices.to_vec();
    sorted_indices.sort_by_key(|&idx| layers[idx].object_index);

    for &idx in &sorted_indices {
        let layer = &layers[idx];
        let mut image = layer.image.clone();

        let scale_factor = max_scale / scale_of(layer);
        if (scale_factor - 1.0).abs() > 0.01 {
            image = scale_image(&image, scale_factor);
        }

        // PDF y grows upward; the canvas row 0 is the top of the bounds
        let offset_x = ((layer.area.x1.min(layer.area.x2) - bounds.x1) * max_scale) as i32;
        let offset_y = ((bounds.y2 - layer.area.y1.max(layer.area.y2)) * max_scale) as i32;

        composite_over(&mut canvas, &image, offset_x, offset_y);
    }

    Some(canvas)
}

/// Scale an image by a factor using Lanczos3
fn scale_image(img: &RgbaImage, scale: f64) -> RgbaImage {
    let new_width = ((img.width() as f64 * scale).ceil() as u32).max(1);
    let new_height = ((img.height() as f64 * scale).ceil() as u32).max(1);
    image::imageops::resize(
        img,
        new_width,
        new_height,
        image::imageops::FilterType::Lanczos3,
    )
}

/// Alpha blend two pixels (Porter-Duff "over")
fn alpha_blend(dst: image::Rgba<u8>, src: image::Rgba<u8>) -> image::Rgba<u8> {
    let src_a = src[3] as f32 / 255.0;
    let dst_a = dst[3] as f32 / 255.0;

    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return image::Rgba([0, 0, 0, 0]);
    }

    let blend = |s: u8, d: u8| -> u8 {
        let s_f = s as f32 / 255.0;
        let d_f = d as f32 / 255.0;
        let out = (s_f * src_a + d_f * dst_a * (1.0 - src_a)) / out_a;
        (out * 255.0).clamp(0.0, 255.0) as u8
    };

    image::Rgba([
        blend(src[0], dst[0]),
        blend(src[1], dst[1]),
        blend(src[2], dst[2]),
        (out_a * 255.0) as u8,
    ])
}

/// Paint a layer onto the canvas at the given offset
fn composite_over(canvas: &mut RgbaImage, layer: &RgbaImage, offset_x: i32, offset_y: i32) {
    for (ly, row) in layer.rows().enumerate() {
        for (lx, &pixel) in row.enumerate() {
            let cx = lx as i32 + offset_x;
            let cy = ly as i32 + offset_y;
            if cx >= 0 && cy >= 0 && cx < canvas.width() as i32 && cy < canvas.height() as i32 {
                let dst = canvas.get_pixel(cx as u32, cy as u32);
                let blended = alpha_blend(*dst, pixel);
                canvas.put_pixel(cx as u32, cy as u32, blended);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn layer(object_index: usize, area: Rect, color: Rgba<u8>, size: u32) -> FigureLayer {
        FigureLayer {
            object_index,
            area,
            image: RgbaImage::from_pixel(size, size, color),
        }
    }

    #[test]
    fn test_overlap_detection_uses_smaller_area() {
        let big = Rect {
            x1: 0.0,
            y1: 0.0,
            x2: 100.0,
            y2: 100.0,
        };
        let inset = Rect {
            x1: 10.0,
            y1: 10.0,
            x2: 30.0,
            y2: 30.0,
        };
        let apart = Rect {
            x1: 200.0,
            y1: 200.0,
            x2: 220.0,
            y2: 220.0,
        };

        // The inset rect is fully covered, so overlap is 100% of it
        assert!(rectangles_overlap(&big, &inset, 0.7));
        assert!(!rectangles_overlap(&big, &apart, 0.7));
    }

    #[test]
    fn test_disjoint_layers_form_separate_groups() {
        let layers = vec![
            layer(
                0,
                Rect {
                    x1: 0.0,
                    y1: 500.0,
                    x2: 100.0,
                    y2: 600.0,
                },
                Rgba([255, 0, 0, 255]),
                10,
            ),
            layer(
                1,
                Rect {
                    x1: 0.0,
                    y1: 0.0,
                    x2: 100.0,
                    y2: 100.0,
                },
                Rgba([0, 255, 0, 255]),
                10,
            ),
        ];

        let groups = group_by_overlap(&layers);
        assert_eq!(groups.len(), 2);
        // Higher on the page (larger y) comes first
        assert_eq!(groups[0], vec![0]);
    }

    #[test]
    fn test_overlapping_layers_composite_front_over_back() {
        let area = Rect {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        };
        let layers = vec![
            layer(0, area, Rgba([255, 0, 0, 255]), 10),
            layer(1, area, Rgba([0, 0, 255, 255]), 10),
        ];

        let groups = group_by_overlap(&layers);
        assert_eq!(groups.len(), 1);

        let composite = composite_group(&layers, &groups[0]).unwrap();
        // Later object paints in front
        assert_eq!(*composite.get_pixel(5, 5), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_transparent_overlay_blends() {
        let area = Rect {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        };
        let layers = vec![
            layer(0, area, Rgba([255, 0, 0, 255]), 10),
            layer(1, area, Rgba([0, 0, 255, 0]), 10),
        ];

        let groups = group_by_overlap(&layers);
        let composite = composite_group(&layers, &groups[0]).unwrap();
        // Fully transparent overlay leaves the back layer visible
        assert_eq!(*composite.get_pixel(5, 5), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_mixed_resolution_group_uses_highest_scale() {
        // Two layers over the same 10pt box at different native resolutions
        let area = Rect {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        };
        let layers = vec![
            layer(0, area, Rgba([255, 0, 0, 255]), 10),
            layer(1, area, Rgba([0, 255, 0, 128]), 40),
        ];

        let groups = group_by_overlap(&layers);
        let composite = composite_group(&layers, &groups[0]).unwrap();
        // Canvas adopts the 40px layer's resolution (4 px per point)
        assert_eq!(composite.dimensions(), (40, 40));
    }
}
