//! Table detection and reconstruction.
//!
//! Detection runs in two stages. The primary path rasterizes each page and
//! looks for ruling lines: the page is binarized against its Otsu threshold,
//! long horizontal and vertical ink runs become candidate rulings, and a
//! consistent set of rulings forms a cell grid. Cell text is then
//! reconstructed with OCR; when no OCR engine is available the raw cropped
//! region is kept instead. If the raster path finds nothing, a vector pass
//! reads thin path objects as rulings and takes cell text straight from the
//! PDF text layer.

use std::path::Path;

use image::{GrayImage, RgbaImage};
use imageproc::contrast::otsu_level;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::error::ServiceResult;

use super::{ocr, pdf};

/// A reconstructed table: rows of cell text, normalized to a rectangular
/// shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    /// Build from raw rows, padding short rows so every row has the same
    /// number of columns.
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Self {
        let cols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(cols, String::new());
        }
        Self { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    /// Fraction of cells containing non-whitespace text
    pub fn filled_ratio(&self) -> f64 {
        let total: usize = self.rows.iter().map(|r| r.len()).sum();
        if total == 0 {
            return 0.0;
        }
        let filled = self
            .rows
            .iter()
            .flatten()
            .filter(|cell| !cell.trim().is_empty())
            .count();
        filled as f64 / total as f64
    }

    pub fn is_acceptable(&self, min_rows: usize, min_cols: usize, min_filled_ratio: f64) -> bool {
        self.row_count() >= min_rows
            && self.col_count() >= min_cols
            && self.filled_ratio() >= min_filled_ratio
    }
}

/// Outcome of table detection for one region
pub(super) enum DetectedTable {
    /// Grid found and cell text reconstructed
    Structured { table: TableData, page_number: i32 },
    /// Grid found but text could not be reconstructed; raw cropped region
    Region { image: RgbaImage, page_number: i32 },
}

/// A detected ruling line. `pos` is the cross-axis position (y for
/// horizontal rulings, x for vertical), `start`/`end` the extent along the
/// line.
#[derive(Debug, Clone, Copy)]
struct Ruling {
    pos: f64,
    start: f64,
    end: f64,
}

/// Cell grid expressed as sorted ruling positions
#[derive(Debug)]
pub(crate) struct Grid {
    /// Vertical ruling x positions
    xs: Vec<u32>,
    /// Horizontal ruling y positions
    ys: Vec<u32>,
}

impl Grid {
    fn rows(&self) -> usize {
        self.ys.len().saturating_sub(1)
    }

    fn cols(&self) -> usize {
        self.xs.len().saturating_sub(1)
    }
}

/// Detect tables across all pages of a PDF
pub(super) fn extract_pdf_tables(
    pdfium: &Pdfium,
    path: &Path,
    config: &ExtractionConfig,
) -> ServiceResult<Vec<DetectedTable>> {
    let document = pdf::load_document(pdfium, path)?;

    let mut results = Vec::new();

    for (page_index, page) in document.pages().iter().enumerate() {
        let page_number = page_index as i32 + 1;

        let raster = match pdf::render_page_raster(&page, config.detection_dpi) {
            Ok(r) => r,
            Err(e) => {
                warn!(page = page_number, error = ?e, "Could not rasterize page");
                continue;
            }
        };

        let gray = image::DynamicImage::ImageRgba8(raster.clone()).to_luma8();
        let Some(grid) = detect_grid(&gray) else {
            continue;
        };

        if grid.rows() < config.table_min_rows || grid.cols() < config.table_min_cols {
            debug!(
                page = page_number,
                rows = grid.rows(),
                cols = grid.cols(),
                "Grid below minimum table dimensions"
            );
            continue;
        }

        debug!(
            page = page_number,
            rows = grid.rows(),
            cols = grid.cols(),
            "Detected table grid"
        );

        match reconstruct_cells(&raster, &grid, config) {
            Some(table) => results.push(DetectedTable::Structured { table, page_number }),
            None => {
                let image = crop_grid_region(&raster, &grid);
                results.push(DetectedTable::Region { image, page_number });
            }
        }
    }

    if results.is_empty() {
        results = extract_vector_tables(&document, config);
    }

    Ok(results)
}

/// Detect a single ruling grid in a grayscale page raster.
///
/// Returns `None` when the page has no consistent set of at least three
/// horizontal and three vertical rulings.
pub(crate) fn detect_grid(gray: &GrayImage) -> Option<Grid> {
    let threshold = otsu_level(gray);
    let (width, height) = gray.dimensions();

    let min_h_len = (width / 6).max(30);
    let horizontals = scan_rulings(gray, threshold, min_h_len, true);
    if horizontals.len() < 3 {
        return None;
    }

    let top = horizontals
        .iter()
        .map(|r| r.pos)
        .fold(f64::MAX, f64::min);
    let bottom = horizontals
        .iter()
        .map(|r| r.pos)
        .fold(f64::MIN, f64::max);
    let table_height = bottom - top;
    if table_height < 10.0 {
        return None;
    }

    // Vertical rulings must span most of the vertical extent the horizontal
    // rulings establish
    let min_v_len = ((table_height * 0.6) as u32).clamp(10, height);
    let verticals: Vec<Ruling> = scan_rulings(gray, threshold, min_v_len, false)
        .into_iter()
        .filter(|r| r.start <= top + table_height * 0.25 && r.end >= bottom - table_height * 0.25)
        .collect();
    if verticals.len() < 3 {
        return None;
    }

    let left = verticals.iter().map(|r| r.pos).fold(f64::MAX, f64::min);
    let right = verticals.iter().map(|r| r.pos).fold(f64::MIN, f64::max);
    let table_width = right - left;

    // Symmetric filter: keep horizontal rulings spanning the table width
    let horizontals: Vec<Ruling> = horizontals
        .into_iter()
        .filter(|r| r.start <= left + table_width * 0.25 && r.end >= right - table_width * 0.25)
        .collect();
    if horizontals.len() < 3 {
        return None;
    }

    Some(Grid {
        xs: verticals.iter().map(|r| r.pos.round() as u32).collect(),
        ys: horizontals.iter().map(|r| r.pos.round() as u32).collect(),
    })
}

/// Scan for rulings along one axis. A ruling is a run of ink at least
/// `min_len` long; runs on adjacent scanlines merge into a single ruling.
fn scan_rulings(gray: &GrayImage, threshold: u8, min_len: u32, horizontal: bool) -> Vec<Ruling> {
    let (width, height) = gray.dimensions();
    let (scanlines, line_len) = if horizontal {
        (height, width)
    } else {
        (width, height)
    };

    let mut raw: Vec<Ruling> = Vec::new();

    for line in 0..scanlines {
        let mut run_start: Option<u32> = None;
        for i in 0..=line_len {
            let is_ink = i < line_len && {
                let (x, y) = if horizontal { (i, line) } else { (line, i) };
                gray.get_pixel(x, y)[0] < threshold
            };

            match (is_ink, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    if i - start >= min_len {
                        raw.push(Ruling {
                            pos: line as f64,
                            start: start as f64,
                            end: i as f64,
                        });
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    merge_rulings(raw, 3.0)
}

/// Merge rulings whose cross-axis positions are within `pos_tol`, unioning
/// their extents. Rulings are kept sorted by position.
fn merge_rulings(mut rulings: Vec<Ruling>, pos_tol: f64) -> Vec<Ruling> {
    rulings.sort_by(|a, b| a.pos.partial_cmp(&b.pos).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged: Vec<Ruling> = Vec::new();
    for ruling in rulings {
        match merged.last_mut() {
            Some(last) if (ruling.pos - last.pos).abs() <= pos_tol => {
                last.start = last.start.min(ruling.start);
                last.end = last.end.max(ruling.end);
            }
            _ => merged.push(ruling),
        }
    }

    merged
}

/// Reconstruct cell text for a grid via OCR. Returns `None` when no OCR
/// engine is available; the caller keeps the raw region instead.
fn reconstruct_cells(
    raster: &RgbaImage,
    grid: &Grid,
    config: &ExtractionConfig,
) -> Option<TableData> {
    if !ocr::engine_available(config.ocr_model_dir.as_deref()) {
        debug!("No OCR engine available for cell reconstruction");
        return None;
    }

    let mut rows = Vec::with_capacity(grid.rows());
    for row in 0..grid.rows() {
        let mut cells = Vec::with_capacity(grid.cols());
        for col in 0..grid.cols() {
            let cell = crop_cell(raster, grid, row, col);
            let text = match cell {
                Some(region) => {
                    ocr::recognize(&region, config.ocr_model_dir.as_deref()).unwrap_or_default()
                }
                None => String::new(),
            };
            cells.push(normalize_cell_text(&text));
        }
        rows.push(cells);
    }

    Some(TableData::from_rows(rows))
}

/// Crop one cell's interior, inset past the ruling thickness
fn crop_cell(raster: &RgbaImage, grid: &Grid, row: usize, col: usize) -> Option<RgbaImage> {
    const INSET: u32 = 2;

    let x0 = grid.xs.get(col)? + INSET;
    let x1 = grid.xs.get(col + 1)?.saturating_sub(INSET);
    let y0 = grid.ys.get(row)? + INSET;
    let y1 = grid.ys.get(row + 1)?.saturating_sub(INSET);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(image::imageops::crop_imm(raster, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Crop the full grid region with a small margin
fn crop_grid_region(raster: &RgbaImage, grid: &Grid) -> RgbaImage {
    const MARGIN: u32 = 8;

    let x0 = grid.xs.first().copied().unwrap_or(0).saturating_sub(MARGIN);
    let y0 = grid.ys.first().copied().unwrap_or(0).saturating_sub(MARGIN);
    let x1 = (grid.xs.last().copied().unwrap_or(0) + MARGIN).min(raster.width());
    let y1 = (grid.ys.last().copied().unwrap_or(0) + MARGIN).min(raster.height());

    image::imageops::crop_imm(raster, x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
        .to_image()
}

/// Collapse OCR output to a single trimmed line
fn normalize_cell_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ==================== Vector fallback ====================

/// Read tables from vector ruling lines and the embedded text layer.
///
/// Thin, long path objects are treated as rulings. This catches documents
/// whose tables render too faintly for the raster pass (hairline strokes)
/// and needs no OCR.
fn extract_vector_tables(document: &PdfDocument<'_>, config: &ExtractionConfig) -> Vec<DetectedTable> {
    let mut results = Vec::new();

    for (page_index, page) in document.pages().iter().enumerate() {
        let page_number = page_index as i32 + 1;

        let mut horizontals: Vec<Ruling> = Vec::new();
        let mut verticals: Vec<Ruling> = Vec::new();

        for object in page.objects().iter() {
            if object.object_type() != PdfPageObjectType::Path {
                continue;
            }
            let Some(bounds) = pdf::object_bounds(&object) else {
                continue;
            };

            const THIN: f64 = 2.5;
            const MIN_SPAN: f64 = 20.0;

            if bounds.height() <= THIN && bounds.width() >= MIN_SPAN {
                horizontals.push(Ruling {
                    pos: (bounds.y1 + bounds.y2) / 2.0,
                    start: bounds.x1.min(bounds.x2),
                    end: bounds.x1.max(bounds.x2),
                });
            } else if bounds.width() <= THIN && bounds.height() >= MIN_SPAN {
                verticals.push(Ruling {
                    pos: (bounds.x1 + bounds.x2) / 2.0,
                    start: bounds.y1.min(bounds.y2),
                    end: bounds.y1.max(bounds.y2),
                });
            }
        }

        let horizontals = merge_rulings(horizontals, 2.0);
        let verticals = merge_rulings(verticals, 2.0);

        if horizontals.len() < 3 || verticals.len() < 3 {
            continue;
        }

        if horizontals.len() - 1 < config.table_min_rows
            || verticals.len() - 1 < config.table_min_cols
        {
            continue;
        }

        let text = match page.text() {
            Ok(t) => t,
            Err(e) => {
                debug!(page = page_number, error = ?e, "No text layer for vector table");
                continue;
            }
        };

        // Horizontal ruling positions are in PDF coordinates where y grows
        // upward, so the first table row sits between the two highest rulings
        let mut ys: Vec<f64> = horizontals.iter().map(|r| r.pos).collect();
        ys.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let xs: Vec<f64> = verticals.iter().map(|r| r.pos).collect();

        let mut rows = Vec::new();
        for window_y in ys.windows(2) {
            let (top, bottom) = (window_y[0], window_y[1]);
            let mut cells = Vec::new();
            for window_x in xs.windows(2) {
                let (left, right) = (window_x[0], window_x[1]);
                let cell_text = text.inside_rect(PdfRect::new(
                    PdfPoints::new(bottom as f32),
                    PdfPoints::new(left as f32),
                    PdfPoints::new(top as f32),
                    PdfPoints::new(right as f32),
                ));
                cells.push(normalize_cell_text(&cell_text));
            }
            rows.push(cells);
        }

        debug!(
            page = page_number,
            rows = rows.len(),
            "Reconstructed table from vector rulings"
        );

        results.push(DetectedTable::Structured {
            table: TableData::from_rows(rows),
            page_number,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const WHITE: Luma<u8> = Luma([255]);
    const BLACK: Luma<u8> = Luma([0]);

    fn draw_h_line(img: &mut GrayImage, y: u32, x0: u32, x1: u32) {
        for x in x0..x1 {
            img.put_pixel(x, y, BLACK);
            img.put_pixel(x, y + 1, BLACK);
        }
    }

    fn draw_v_line(img: &mut GrayImage, x: u32, y0: u32, y1: u32) {
        for y in y0..y1 {
            img.put_pixel(x, y, BLACK);
            img.put_pixel(x + 1, y, BLACK);
        }
    }

    /// A clean 3x3 table grid spanning most of a 400x300 page
    fn grid_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(400, 300, WHITE);
        for y in [50, 110, 170, 230] {
            draw_h_line(&mut img, y, 40, 360);
        }
        for x in [40, 150, 260, 358] {
            draw_v_line(&mut img, x, 50, 231);
        }
        img
    }

    #[test]
    fn test_detect_grid_finds_3x3_table() {
        let grid = detect_grid(&grid_image()).expect("grid should be detected");
        assert_eq!(grid.rows(), 3);
        assert_eq!(grid.cols(), 3);
    }

    #[test]
    fn test_blank_page_has_no_grid() {
        let img = GrayImage::from_pixel(400, 300, WHITE);
        assert!(detect_grid(&img).is_none());
    }

    #[test]
    fn test_lines_without_crossings_are_not_a_grid() {
        // Horizontal rulings only, like a form with underlines
        let mut img = GrayImage::from_pixel(400, 300, WHITE);
        for y in [60, 120, 180, 240] {
            draw_h_line(&mut img, y, 40, 360);
        }
        assert!(detect_grid(&img).is_none());
    }

    #[test]
    fn test_short_strokes_are_ignored() {
        let mut img = grid_image();
        // Text-like short marks should not add phantom rulings
        for y in [70, 75, 80] {
            draw_h_line(&mut img, y, 60, 90);
        }
        let grid = detect_grid(&img).expect("grid still detected");
        assert_eq!(grid.rows(), 3);
        assert_eq!(grid.cols(), 3);
    }

    #[test]
    fn test_merge_rulings_unions_adjacent_scanlines() {
        let rulings = vec![
            Ruling {
                pos: 100.0,
                start: 10.0,
                end: 200.0,
            },
            Ruling {
                pos: 101.0,
                start: 150.0,
                end: 300.0,
            },
            Ruling {
                pos: 140.0,
                start: 10.0,
                end: 300.0,
            },
        ];

        let merged = merge_rulings(rulings, 3.0);
        assert_eq!(merged.len(), 2);
        assert!((merged[0].start - 10.0).abs() < f64::EPSILON);
        assert!((merged[0].end - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_table_data_normalizes_ragged_rows() {
        let table = TableData::from_rows(vec![
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec!["d".to_string()],
        ]);
        assert_eq!(table.col_count(), 3);
        assert_eq!(table.rows[1].len(), 3);
    }

    #[test]
    fn test_filled_ratio() {
        let table = TableData::from_rows(vec![
            vec!["a".to_string(), String::new()],
            vec!["  ".to_string(), "b".to_string()],
        ]);
        assert!((table.filled_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_acceptance_thresholds() {
        let full = TableData::from_rows(vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string(), "d".to_string()],
        ]);
        assert!(full.is_acceptable(2, 2, 0.3));
        assert!(!full.is_acceptable(3, 2, 0.3));
        assert!(!full.is_acceptable(2, 3, 0.3));

        let sparse = TableData::from_rows(vec![
            vec!["a".to_string(), String::new(), String::new(), String::new()],
            vec![String::new(); 4],
            vec![String::new(); 4],
        ]);
        // 1 of 12 cells filled: rejected on ratio regardless of dimensions
        assert!(!sparse.is_acceptable(2, 2, 0.3));
    }

    #[test]
    fn test_normalize_cell_text_collapses_whitespace() {
        assert_eq!(normalize_cell_text("  Mean \n value  "), "Mean value");
        assert_eq!(normalize_cell_text("\n"), "");
    }

    #[test]
    fn test_crop_cell_respects_inset() {
        let raster = RgbaImage::from_pixel(400, 300, image::Rgba([255, 255, 255, 255]));
        let grid = Grid {
            xs: vec![40, 150, 260, 358],
            ys: vec![50, 110, 170, 230],
        };

        let cell = crop_cell(&raster, &grid, 0, 0).unwrap();
        assert_eq!(cell.dimensions(), (150 - 40 - 4, 110 - 50 - 4));

        // Out-of-range indices yield no cell
        assert!(crop_cell(&raster, &grid, 3, 0).is_none());
    }
}
