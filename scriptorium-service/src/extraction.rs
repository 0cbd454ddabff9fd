//! Document image and table extraction pipeline.
//!
//! Given an uploaded document blob, this module harvests embedded figures,
//! detects tabular regions, renders accepted tables into presentation
//! rasters, and persists everything as ordered `ProjectImage` attachments.
//!
//! The pipeline is best-effort throughout: a single bad figure or table is
//! logged and skipped, and a document that cannot be parsed at all yields
//! zero attachments rather than an error reaching any HTTP caller.

mod docx;
mod ocr;
mod pdf;
mod render;
mod tables;

pub use tables::TableData;

#[cfg(test)]
pub(crate) use docx::tests::write_fixture_docx as docx_test_fixture;

use std::path::{Path, PathBuf};

use chrono::Utc;
use image::codecs::webp::WebPEncoder;
use image::{ImageEncoder, RgbaImage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::db::{Database, ImageOrigin, ProjectImage};
use crate::error::{ProcessingError, ServiceError, ServiceResult, format_error_chain};

/// A single item produced by a document pass, before persistence policy is
/// applied.
enum ExtractedItem {
    /// An embedded picture that is already an encoded image (DOCX media
    /// parts keep their original format).
    Encoded {
        bytes: Vec<u8>,
        content_type: &'static str,
    },
    /// A raster harvested and composited from a PDF page.
    Raster { image: RgbaImage },
    /// A reconstructed table to be rendered into a styled raster.
    Table { table: TableData },
    /// A detected table region whose text could not be reconstructed;
    /// persisted as the raw cropped region.
    TableRegion { image: RgbaImage },
}

impl ExtractedItem {
    fn origin(&self) -> ImageOrigin {
        match self {
            ExtractedItem::Encoded { .. } | ExtractedItem::Raster { .. } => ImageOrigin::Figure,
            ExtractedItem::Table { .. } | ExtractedItem::TableRegion { .. } => ImageOrigin::Table,
        }
    }
}

/// Extracts figure and table attachments from uploaded documents.
pub struct DocumentImageExtractor {
    config: ExtractionConfig,
    data_dir: PathBuf,
}

impl DocumentImageExtractor {
    pub fn new(config: ExtractionConfig, data_dir: PathBuf) -> Self {
        Self { config, data_dir }
    }

    /// Run extraction over a stored document and persist the results.
    ///
    /// Returns the number of attachments persisted. Per-item failures are
    /// skipped; only a top-level parse failure surfaces as an error (the
    /// caller runs in a background job and records it there).
    pub fn extract_document_images(
        &self,
        db: &Database,
        project_id: &str,
        document_path: &Path,
        filename: &str,
        extract_tables: bool,
    ) -> ServiceResult<usize> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        info!(
            project_id = %project_id,
            filename = %filename,
            format = %extension,
            extract_tables = extract_tables,
            "Extracting document images"
        );

        let items = match extension.as_str() {
            "pdf" => self.extract_pdf(document_path, extract_tables)?,
            "docx" => self.extract_docx(document_path, extract_tables)?,
            _ => {
                return Err(ServiceError::Processing(
                    ProcessingError::UnsupportedFormat { format: extension },
                ));
            }
        };

        let persisted = self.persist_items(db, project_id, items)?;

        info!(
            project_id = %project_id,
            persisted = persisted,
            "Document extraction complete"
        );

        Ok(persisted)
    }

    /// PDF pass: harvest embedded figures, then detect tables when requested.
    fn extract_pdf(
        &self,
        document_path: &Path,
        extract_tables: bool,
    ) -> ServiceResult<Vec<ExtractedItem>> {
        let pdfium = pdf::create_pdfium()?;

        let mut items = Vec::new();

        let figures = pdf::harvest_embedded_images(&pdfium, document_path)?;
        let figure_count = figures.len();
        for figure in figures {
            items.push(ExtractedItem::Raster {
                image: figure.image,
            });
        }

        if extract_tables {
            // Table detection never takes the whole document down: a failure
            // here leaves the harvested figures intact.
            match tables::extract_pdf_tables(&pdfium, document_path, &self.config) {
                Ok(detected) => {
                    for table in detected {
                        match table {
                            tables::DetectedTable::Structured { table, page_number } => {
                                if self.table_is_acceptable(&table, page_number) {
                                    items.push(ExtractedItem::Table { table });
                                }
                            }
                            tables::DetectedTable::Region { image, page_number } => {
                                debug!(
                                    page = page_number,
                                    "Keeping raw table region (no text reconstruction)"
                                );
                                items.push(ExtractedItem::TableRegion { image });
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %format_error_chain(&e), "PDF table detection failed");
                }
            }
        }

        debug!(
            figures = figure_count,
            total = items.len(),
            "PDF pass finished"
        );

        Ok(items)
    }

    /// DOCX pass: embedded media parts and native table elements.
    fn extract_docx(
        &self,
        document_path: &Path,
        extract_tables: bool,
    ) -> ServiceResult<Vec<ExtractedItem>> {
        let parsed = docx::parse_docx(document_path)?;

        let mut items = Vec::new();
        for picture in parsed.pictures {
            items.push(ExtractedItem::Encoded {
                bytes: picture.bytes,
                content_type: picture.content_type,
            });
        }

        if extract_tables {
            for (index, table) in parsed.tables.into_iter().enumerate() {
                if self.table_is_acceptable(&table, index as i32) {
                    items.push(ExtractedItem::Table { table });
                }
            }
        }

        Ok(items)
    }

    fn table_is_acceptable(&self, table: &TableData, position: i32) -> bool {
        let accepted = table.is_acceptable(
            self.config.table_min_rows,
            self.config.table_min_cols,
            self.config.table_min_filled_ratio,
        );

        if !accepted {
            debug!(
                position = position,
                rows = table.row_count(),
                cols = table.col_count(),
                filled_ratio = table.filled_ratio(),
                "Rejected table below acceptance thresholds"
            );
            metrics::counter!("scriptorium_tables_rejected_total").increment(1);
        }

        accepted
    }

    /// Persist extracted items as ordered attachments. Order indices append
    /// after the project's existing images and stay contiguous across the
    /// batch; a failed item gives its slot to the next one.
    fn persist_items(
        &self,
        db: &Database,
        project_id: &str,
        items: Vec<ExtractedItem>,
    ) -> ServiceResult<usize> {
        let images_dir = self.data_dir.join("images").join(project_id);
        std::fs::create_dir_all(&images_dir).map_err(ProcessingError::Io)?;

        let mut order_index = db.next_order_index(project_id)?;
        let mut persisted = 0;

        for item in items {
            let origin = item.origin();
            match self.persist_one(db, project_id, &images_dir, item, order_index) {
                Ok(true) => {
                    order_index += 1;
                    persisted += 1;
                    metrics::counter!(
                        "scriptorium_extracted_images_total",
                        "origin" => origin.as_str()
                    )
                    .increment(1);
                }
                Ok(false) => {
                    // Filtered by policy; not an error
                }
                Err(e) => {
                    warn!(
                        project_id = %project_id,
                        origin = origin.as_str(),
                        error = %format_error_chain(&e),
                        "Skipping extracted item"
                    );
                    metrics::counter!("scriptorium_extraction_item_failures_total").increment(1);
                }
            }
        }

        Ok(persisted)
    }

    /// Persist a single item. Returns `Ok(false)` when the item was filtered
    /// by the size policy rather than failing.
    fn persist_one(
        &self,
        db: &Database,
        project_id: &str,
        images_dir: &Path,
        item: ExtractedItem,
        order_index: i32,
    ) -> ServiceResult<bool> {
        let origin = item.origin();
        let (bytes, content_type, width, height) = match item {
            ExtractedItem::Encoded {
                bytes,
                content_type,
            } => {
                if bytes.len() < self.config.min_image_bytes {
                    debug!(
                        size = bytes.len(),
                        threshold = self.config.min_image_bytes,
                        "Discarding undersized embedded image"
                    );
                    return Ok(false);
                }
                let decoded = image::load_from_memory(&bytes).map_err(|e| {
                    ProcessingError::DocumentParse {
                        source: Box::new(e),
                    }
                })?;
                let (w, h) = (decoded.width(), decoded.height());
                if w < self.config.min_image_dimension || h < self.config.min_image_dimension {
                    debug!(width = w, height = h, "Discarding tiny embedded image");
                    return Ok(false);
                }
                (bytes, content_type, w, h)
            }
            ExtractedItem::Raster { image } => {
                let (w, h) = image.dimensions();
                if w < self.config.min_image_dimension || h < self.config.min_image_dimension {
                    debug!(width = w, height = h, "Discarding tiny harvested image");
                    return Ok(false);
                }
                let bytes = encode_webp(&image)?;
                if bytes.len() < self.config.min_image_bytes {
                    debug!(
                        size = bytes.len(),
                        threshold = self.config.min_image_bytes,
                        "Discarding undersized harvested image"
                    );
                    return Ok(false);
                }
                (bytes, "image/webp", w, h)
            }
            ExtractedItem::Table { table } => {
                // Missing fonts degrade to a textless render rather than
                // dropping the table.
                let font = render::discover_table_font(self.config.table_font_path.as_deref());
                let image = render::render_table(&table, font.as_ref());
                let (w, h) = image.dimensions();
                (encode_webp(&image)?, "image/webp", w, h)
            }
            ExtractedItem::TableRegion { image } => {
                let (w, h) = image.dimensions();
                if w < self.config.min_image_dimension || h < self.config.min_image_dimension {
                    return Ok(false);
                }
                (encode_webp(&image)?, "image/webp", w, h)
            }
        };

        let image_id = Uuid::new_v4().to_string();
        let file_name = format!("{}.{}", image_id, extension_for(content_type));
        let file_path = images_dir.join(&file_name);
        std::fs::write(&file_path, &bytes).map_err(ProcessingError::Io)?;

        let record = ProjectImage {
            id: image_id,
            project_id: project_id.to_string(),
            internal_path: file_path.to_string_lossy().to_string(),
            content_type: content_type.to_string(),
            order_index,
            is_featured: false,
            width: Some(width),
            height: Some(height),
            origin,
            created_at: Utc::now(),
        };

        if let Err(e) = db.insert_project_image(&record) {
            // Keep the blob store consistent with the database
            let _ = std::fs::remove_file(&file_path);
            return Err(e);
        }

        Ok(true)
    }
}

/// Encode an RGBA raster as lossless WebP
fn encode_webp(image: &RgbaImage) -> ServiceResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = WebPEncoder::new_lossless(&mut bytes);
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| {
            ServiceError::Processing(ProcessingError::DocumentParse {
                source: Box::new(e),
            })
        })?;
    Ok(bytes)
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::db::tests::{insert_test_project, insert_test_user};
    use image::Rgba;

    fn extractor(data_dir: &Path) -> DocumentImageExtractor {
        DocumentImageExtractor::new(ExtractionConfig::default(), data_dir.to_path_buf())
    }

    fn setup() -> (Database, String, tempfile::TempDir) {
        let db = Database::open_in_memory().unwrap();
        insert_test_user(&db, "u1", Role::Faculty);
        let project_id = insert_test_project(&db, "u1", "Extracted");
        let dir = tempfile::tempdir().unwrap();
        (db, project_id, dir)
    }

    /// A raster that survives both the dimension and byte-size policies:
    /// random-ish noise compresses poorly, so the encoded size stays large.
    fn qualifying_raster(seed: u32) -> RgbaImage {
        RgbaImage::from_fn(200, 200, |x, y| {
            let v = (x.wrapping_mul(31).wrapping_add(y.wrapping_mul(17)).wrapping_add(seed) % 251)
                as u8;
            Rgba([v, v.wrapping_add(41), v.wrapping_add(97), 255])
        })
    }

    #[test]
    fn test_persisted_order_indices_are_contiguous_and_appended() {
        let (db, project_id, dir) = setup();
        let extractor = extractor(dir.path());

        // Pre-existing uploaded image occupies index 0
        let existing = ProjectImage {
            id: "existing".to_string(),
            project_id: project_id.clone(),
            internal_path: "/tmp/existing.png".to_string(),
            content_type: "image/png".to_string(),
            order_index: 0,
            is_featured: false,
            width: Some(64),
            height: Some(64),
            origin: ImageOrigin::Uploaded,
            created_at: Utc::now(),
        };
        db.insert_project_image(&existing).unwrap();

        let items = vec![
            ExtractedItem::Raster {
                image: qualifying_raster(1),
            },
            ExtractedItem::Raster {
                image: qualifying_raster(2),
            },
            ExtractedItem::Raster {
                image: qualifying_raster(3),
            },
        ];

        let persisted = extractor.persist_items(&db, &project_id, items).unwrap();
        assert_eq!(persisted, 3);

        let images = db.get_project_images(&project_id).unwrap();
        let indices: Vec<i32> = images.iter().map(|i| i.order_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(images[1].origin, ImageOrigin::Figure);
    }

    #[test]
    fn test_undersized_images_are_never_persisted() {
        let (db, project_id, dir) = setup();
        let extractor = extractor(dir.path());

        // Tiny solid-color raster: fails the dimension policy
        let tiny = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        // Encoded payload below the byte threshold
        let small_bytes = vec![0u8; 100];

        let items = vec![
            ExtractedItem::Raster { image: tiny },
            ExtractedItem::Encoded {
                bytes: small_bytes,
                content_type: "image/png",
            },
        ];

        let persisted = extractor.persist_items(&db, &project_id, items).unwrap();
        assert_eq!(persisted, 0);
        assert_eq!(db.get_image_count(&project_id).unwrap(), 0);
    }

    #[test]
    fn test_failed_item_does_not_abort_batch() {
        let (db, project_id, dir) = setup();
        let extractor = extractor(dir.path());

        // Garbage bytes large enough to pass the size filter but impossible
        // to decode; the batch continues past them.
        let mut garbage = vec![0u8; 8192];
        garbage[0] = 0xFF;

        let items = vec![
            ExtractedItem::Encoded {
                bytes: garbage,
                content_type: "image/png",
            },
            ExtractedItem::Raster {
                image: qualifying_raster(7),
            },
        ];

        let persisted = extractor.persist_items(&db, &project_id, items).unwrap();
        assert_eq!(persisted, 1);

        let images = db.get_project_images(&project_id).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].order_index, 0);
    }

    #[test]
    fn test_low_fill_ratio_table_rejected() {
        let (_, _, dir) = setup();
        let extractor = extractor(dir.path());

        // 4x4 grid with only 4 populated cells: 25% < 30% threshold
        let mut rows = vec![vec![String::new(); 4]; 4];
        rows[0][0] = "a".to_string();
        rows[1][1] = "b".to_string();
        rows[2][2] = "c".to_string();
        rows[3][3] = "d".to_string();
        let sparse = TableData { rows };

        assert!(!extractor.table_is_acceptable(&sparse, 0));

        // Filling one more cell pushes it over the threshold
        let mut rows = sparse.rows.clone();
        rows[0][1] = "e".to_string();
        assert!(extractor.table_is_acceptable(&TableData { rows }, 0));
    }

    #[test]
    fn test_unsupported_format_is_an_error() {
        let (db, project_id, dir) = setup();
        let extractor = extractor(dir.path());

        let doc = dir.path().join("notes.odt");
        std::fs::write(&doc, b"not a document").unwrap();

        let result =
            extractor.extract_document_images(&db, &project_id, &doc, "notes.odt", false);
        assert!(matches!(
            result,
            Err(ServiceError::Processing(
                ProcessingError::UnsupportedFormat { .. }
            ))
        ));
    }

    #[test]
    fn test_docx_extraction_counts_pictures_and_table() {
        let (db, project_id, dir) = setup();
        let extractor = extractor(dir.path());

        let doc = dir.path().join("fixture.docx");
        docx::tests::write_fixture_docx(&doc, 2, true);

        let persisted = extractor
            .extract_document_images(&db, &project_id, &doc, "fixture.docx", true)
            .unwrap();

        // 2 embedded pictures + one fully-populated 3x3 table
        assert_eq!(persisted, 3);

        let images = db.get_project_images(&project_id).unwrap();
        let origins: Vec<ImageOrigin> = images.iter().map(|i| i.origin).collect();
        assert_eq!(
            origins,
            vec![ImageOrigin::Figure, ImageOrigin::Figure, ImageOrigin::Table]
        );
        let indices: Vec<i32> = images.iter().map(|i| i.order_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
