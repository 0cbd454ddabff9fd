//! DOCX parsing: embedded pictures and native tables.
//!
//! DOCX files are ZIP archives of XML parts. The pieces needed here:
//! - `word/document.xml`: body content (`w:tbl` tables, `w:drawing` images)
//! - `word/_rels/document.xml.rels`: relationship ids to media paths
//! - `word/media/*`: the embedded image payloads
//!
//! Pictures keep their original encoded bytes; tables are read directly from
//! `w:tbl` elements, so no computer vision or OCR is involved on this path.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{ProcessingError, ServiceResult};

use super::tables::TableData;

/// An embedded picture with its original encoding
pub(super) struct DocxPicture {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Everything extraction needs from one DOCX file
pub(super) struct DocxContent {
    pub pictures: Vec<DocxPicture>,
    pub tables: Vec<TableData>,
}

/// Parse a DOCX file into pictures and tables, in document order.
pub(super) fn parse_docx(path: &Path) -> ServiceResult<DocxContent> {
    let file = std::fs::File::open(path).map_err(ProcessingError::Io)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ProcessingError::DocumentParse {
        source: Box::new(e),
    })?;

    let relationships = parse_relationships(&mut archive)?;
    let document_xml = read_archive_file(&mut archive, "word/document.xml")?;
    let body = walk_body(&document_xml);

    let mut pictures = Vec::new();
    for rel_id in &body.picture_rel_ids {
        let Some(target) = relationships.get(rel_id) else {
            debug!(rel_id = %rel_id, "Picture relationship not found");
            continue;
        };

        let Some(content_type) = content_type_for_target(target) else {
            debug!(target = %target, "Skipping unsupported media format");
            continue;
        };

        match read_archive_file(&mut archive, &format!("word/{}", target)) {
            Ok(bytes) => pictures.push(DocxPicture {
                bytes,
                content_type,
            }),
            Err(e) => {
                debug!(target = %target, error = ?e, "Could not read media part");
            }
        }
    }

    Ok(DocxContent {
        pictures,
        tables: body.tables,
    })
}

/// Parse `word/_rels/document.xml.rels` into an id -> target map
fn parse_relationships<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
) -> ServiceResult<HashMap<String, String>> {
    let xml = match read_archive_file(archive, "word/_rels/document.xml.rels") {
        Ok(bytes) => bytes,
        // A document without relationships has no pictures to resolve
        Err(_) => return Ok(HashMap::new()),
    };

    let mut reader = Reader::from_reader(xml.as_slice());
    reader.trim_text(true);

    let mut relationships = HashMap::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if e.name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(String::from_utf8_lossy(&attr.value).to_string()),
                        b"Target" => {
                            target = Some(String::from_utf8_lossy(&attr.value).to_string())
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    relationships.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProcessingError::DocumentParse {
                    source: Box::new(e),
                }
                .into());
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

/// State collected while walking `word/document.xml`
#[derive(Default)]
struct BodyContent {
    picture_rel_ids: Vec<String>,
    tables: Vec<TableData>,
}

/// In-progress table while its element is open. Tables nest, so these stack.
#[derive(Default)]
struct TableBuilder {
    rows: Vec<Vec<String>>,
    current_row: Vec<String>,
    current_cell: Option<String>,
}

/// Stream through the document body, collecting picture relationship ids and
/// table cell text in document order.
fn walk_body(xml: &[u8]) -> BodyContent {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut content = BodyContent::default();
    let mut table_stack: Vec<TableBuilder> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:tbl" => table_stack.push(TableBuilder::default()),
                b"w:tr" => {
                    if let Some(table) = table_stack.last_mut() {
                        table.current_row = Vec::new();
                    }
                }
                b"w:tc" => {
                    if let Some(table) = table_stack.last_mut() {
                        table.current_cell = Some(String::new());
                    }
                }
                b"a:blip" => {
                    if let Some(rel_id) = get_attr(&e, b"r:embed") {
                        content.picture_rel_ids.push(rel_id);
                    }
                }
                b"v:imagedata" => {
                    if let Some(rel_id) = get_attr(&e, b"r:id") {
                        content.picture_rel_ids.push(rel_id);
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"a:blip" => {
                    if let Some(rel_id) = get_attr(&e, b"r:embed") {
                        content.picture_rel_ids.push(rel_id);
                    }
                }
                b"v:imagedata" => {
                    if let Some(rel_id) = get_attr(&e, b"r:id") {
                        content.picture_rel_ids.push(rel_id);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Some(table) = table_stack.last_mut() {
                    if let Some(cell) = table.current_cell.as_mut() {
                        if let Ok(text) = e.unescape() {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(text.trim());
                        }
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:tc" => {
                    if let Some(table) = table_stack.last_mut() {
                        let cell = table.current_cell.take().unwrap_or_default();
                        table.current_row.push(cell);
                    }
                }
                b"w:tr" => {
                    if let Some(table) = table_stack.last_mut() {
                        let row = std::mem::take(&mut table.current_row);
                        if !row.is_empty() {
                            table.rows.push(row);
                        }
                    }
                }
                b"w:tbl" => {
                    if let Some(builder) = table_stack.pop() {
                        if !builder.rows.is_empty() {
                            content.tables.push(TableData::from_rows(builder.rows));
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!(error = %e, "Stopping document walk on malformed XML");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    content
}

fn get_attr(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

fn read_archive_file<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, ProcessingError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| ProcessingError::DocumentParse {
            source: Box::new(e),
        })?;

    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes).map_err(ProcessingError::Io)?;
    Ok(bytes)
}

fn content_type_for_target(target: &str) -> Option<&'static str> {
    let extension = Path::new(target)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())?;

    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "webp" => Some("image/webp"),
        // Vector metafiles (emf/wmf) have no raster decoder here
        _ => None,
    }
}
