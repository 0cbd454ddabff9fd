//! Styled raster rendering of reconstructed tables.
//!
//! Downstream consumers only display images, so accepted tables are always
//! rendered to a raster: header row highlighted, alternating body row fills,
//! and a light grid. Text needs a TTF font, which is discovered at runtime
//! the same way the PDFium library is; with no font available the render
//! degrades to fills and grid only.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use super::tables::TableData;

const HEADER_FILL: Rgba<u8> = Rgba([226, 232, 240, 255]);
const ROW_FILL_EVEN: Rgba<u8> = Rgba([255, 255, 255, 255]);
const ROW_FILL_ODD: Rgba<u8> = Rgba([247, 250, 252, 255]);
const GRID_LINE: Rgba<u8> = Rgba([148, 163, 184, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([15, 23, 42, 255]);

const FONT_SIZE: f32 = 16.0;
const CELL_PADDING: u32 = 8;
const MIN_COL_WIDTH: u32 = 48;
const MAX_COL_WIDTH: u32 = 320;

/// Common locations for a usable sans-serif TTF
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
];

/// Load a font for table renders, trying the configured path first and then
/// common system locations.
pub(super) fn discover_table_font(configured: Option<&Path>) -> Option<FontVec> {
    let candidates = configured
        .map(|p| vec![p.to_path_buf()])
        .unwrap_or_default()
        .into_iter()
        .chain(FONT_CANDIDATES.iter().map(std::path::PathBuf::from));

    for candidate in candidates {
        if let Ok(bytes) = std::fs::read(&candidate) {
            if let Ok(font) = FontVec::try_from_vec(bytes) {
                tracing::debug!(path = %candidate.display(), "Loaded table render font");
                return Some(font);
            }
        }
    }

    tracing::warn!("No table render font found; rendering tables without text");
    None
}

/// Render a table into a styled raster image.
pub(super) fn render_table(table: &TableData, font: Option<&FontVec>) -> RgbaImage {
    let scale = PxScale::from(FONT_SIZE);
    let rows = table.row_count().max(1);
    let cols = table.col_count().max(1);

    let line_height = font
        .map(|f| text_size(scale, f, "Ag").1)
        .unwrap_or(FONT_SIZE as u32);
    let row_height = line_height + 2 * CELL_PADDING;

    // Column widths track the widest cell, clamped to keep one runaway cell
    // from blowing up the raster
    let mut col_widths = vec![MIN_COL_WIDTH; cols];
    if let Some(font) = font {
        for row in &table.rows {
            for (col, cell) in row.iter().enumerate() {
                let width = text_size(scale, font, cell).0 + 2 * CELL_PADDING;
                col_widths[col] = col_widths[col].max(width.min(MAX_COL_WIDTH));
            }
        }
    } else {
        col_widths = vec![MAX_COL_WIDTH / 2; cols];
    }

    let total_width: u32 = col_widths.iter().sum::<u32>() + 1;
    let total_height: u32 = rows as u32 * row_height + 1;
    let mut img = RgbaImage::from_pixel(total_width, total_height, ROW_FILL_EVEN);

    // Row fills
    for row in 0..rows {
        let fill = if row == 0 {
            HEADER_FILL
        } else if row % 2 == 1 {
            ROW_FILL_ODD
        } else {
            ROW_FILL_EVEN
        };
        draw_filled_rect_mut(
            &mut img,
            Rect::at(0, (row as u32 * row_height) as i32).of_size(total_width, row_height),
            fill,
        );
    }

    // Grid lines
    for row in 0..=rows {
        let y = (row as u32 * row_height).min(total_height - 1);
        draw_filled_rect_mut(&mut img, Rect::at(0, y as i32).of_size(total_width, 1), GRID_LINE);
    }
    let mut x = 0u32;
    for width in col_widths.iter().chain(std::iter::once(&0)) {
        let line_x = x.min(total_width - 1);
        draw_filled_rect_mut(
            &mut img,
            Rect::at(line_x as i32, 0).of_size(1, total_height),
            GRID_LINE,
        );
        x += width;
    }

    // Cell text
    if let Some(font) = font {
        for (row_idx, row) in table.rows.iter().enumerate() {
            let mut cell_x = 0u32;
            for (col_idx, cell) in row.iter().enumerate() {
                let max_text_width = col_widths[col_idx].saturating_sub(2 * CELL_PADDING);
                let fitted = fit_text(font, scale, cell, max_text_width);
                if !fitted.is_empty() {
                    draw_text_mut(
                        &mut img,
                        TEXT_COLOR,
                        (cell_x + CELL_PADDING) as i32,
                        (row_idx as u32 * row_height + CELL_PADDING) as i32,
                        scale,
                        font,
                        &fitted,
                    );
                }
                cell_x += col_widths[col_idx];
            }
        }
    }

    img
}

/// Truncate text with an ellipsis so it fits the given pixel width
fn fit_text(font: &FontVec, scale: PxScale, text: &str, max_width: u32) -> String {
    if text.is_empty() || text_size(scale, font, text).0 <= max_width {
        return text.to_string();
    }

    let mut fitted = String::new();
    for c in text.chars() {
        let candidate = format!("{}{}…", fitted, c);
        if text_size(scale, font, &candidate).0 > max_width {
            break;
        }
        fitted.push(c);
    }

    if fitted.is_empty() {
        String::new()
    } else {
        format!("{}…", fitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableData {
        TableData::from_rows(vec![
            vec!["Metric".to_string(), "Control".to_string(), "Treatment".to_string()],
            vec!["Yield".to_string(), "12.4".to_string(), "15.1".to_string()],
            vec!["Loss".to_string(), "0.8".to_string(), "0.3".to_string()],
        ])
    }

    #[test]
    fn test_render_without_font_still_produces_raster() {
        let img = render_table(&sample_table(), None);
        assert!(img.width() > 0);
        assert!(img.height() > 0);

        // Header fill appears in the first row band
        assert_eq!(*img.get_pixel(img.width() / 2, 4), HEADER_FILL);
    }

    #[test]
    fn test_render_alternates_row_fills() {
        let img = render_table(&sample_table(), None);
        let row_height = (img.height() - 1) / 3;

        let mid_row_1 = *img.get_pixel(img.width() / 2, row_height + row_height / 2);
        let mid_row_2 = *img.get_pixel(img.width() / 2, 2 * row_height + row_height / 2);
        assert_eq!(mid_row_1, ROW_FILL_ODD);
        assert_eq!(mid_row_2, ROW_FILL_EVEN);
    }

    #[test]
    fn test_render_with_discovered_font() {
        // Only meaningful on hosts that have a system TTF
        let Some(font) = discover_table_font(None) else {
            return;
        };

        let img = render_table(&sample_table(), Some(&font));
        assert!(img.width() >= 3 * MIN_COL_WIDTH);

        // Some text pixels should be drawn in the header band
        let row_height = text_size(PxScale::from(FONT_SIZE), &font, "Ag").1 + 2 * CELL_PADDING;
        let has_text = (0..img.width())
            .flat_map(|x| (0..row_height).map(move |y| (x, y)))
            .any(|(x, y)| *img.get_pixel(x, y) == TEXT_COLOR);
        assert!(has_text);
    }

    #[test]
    fn test_fit_text_truncates_with_ellipsis() {
        let Some(font) = discover_table_font(None) else {
            return;
        };
        let scale = PxScale::from(FONT_SIZE);

        let long = "a very long header that cannot possibly fit";
        let fitted = fit_text(&font, scale, long, 60);
        assert!(fitted.ends_with('…'));
        assert!(text_size(scale, &font, &fitted).0 <= 60 + FONT_SIZE as u32);

        assert_eq!(fit_text(&font, scale, "ok", 500), "ok");
    }
}
