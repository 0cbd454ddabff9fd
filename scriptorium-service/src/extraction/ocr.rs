//! Optional OCR backend for table cell reconstruction.
//!
//! Built on the pure-Rust ocrs engine behind the `table-ocr` feature. The
//! engine is initialized once per process; model files are discovered on
//! disk and never downloaded. Without the feature, or without models, the
//! callers degrade to raw table-region crops.

#[cfg(feature = "table-ocr")]
pub(super) use enabled::{engine_available, recognize};

#[cfg(not(feature = "table-ocr"))]
pub(super) use disabled::{engine_available, recognize};

#[cfg(feature = "table-ocr")]
mod enabled {
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;

    use image::RgbaImage;
    use tracing::{debug, warn};

    const DETECTION_MODEL: &str = "text-detection.rten";
    const RECOGNITION_MODEL: &str = "text-recognition.rten";

    /// Engine is initialized at most once; a failed initialization is
    /// remembered so every table does not retry model loading.
    static OCR_ENGINE: OnceLock<Option<ocrs::OcrEngine>> = OnceLock::new();

    fn candidate_dirs(configured: Option<&Path>) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = configured {
            dirs.push(dir.to_path_buf());
        }
        dirs.push(PathBuf::from("./models/ocrs"));
        if let Some(home) = std::env::var_os("HOME") {
            dirs.push(PathBuf::from(home).join(".cache/ocrs"));
        }
        dirs.push(PathBuf::from("/usr/share/ocrs"));
        dirs
    }

    fn find_model_dir(configured: Option<&Path>) -> Option<PathBuf> {
        candidate_dirs(configured).into_iter().find(|dir| {
            dir.join(DETECTION_MODEL).is_file() && dir.join(RECOGNITION_MODEL).is_file()
        })
    }

    fn engine(model_dir: Option<&Path>) -> Option<&'static ocrs::OcrEngine> {
        OCR_ENGINE
            .get_or_init(|| {
                let dir = match find_model_dir(model_dir) {
                    Some(dir) => dir,
                    None => {
                        warn!("No OCR model directory found; table text reconstruction disabled");
                        return None;
                    }
                };

                let detection = match rten::Model::load_file(dir.join(DETECTION_MODEL)) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "Failed to load OCR detection model");
                        return None;
                    }
                };
                let recognition = match rten::Model::load_file(dir.join(RECOGNITION_MODEL)) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "Failed to load OCR recognition model");
                        return None;
                    }
                };

                match ocrs::OcrEngine::new(ocrs::OcrEngineParams {
                    detection_model: Some(detection),
                    recognition_model: Some(recognition),
                    ..Default::default()
                }) {
                    Ok(engine) => {
                        debug!(dir = %dir.display(), "OCR engine initialized");
                        Some(engine)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to create OCR engine");
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Whether an OCR engine can be used in this process
    pub(crate) fn engine_available(model_dir: Option<&Path>) -> bool {
        engine(model_dir).is_some()
    }

    /// Recognize text in an image region. `None` means no engine; a
    /// recognition failure reads as an empty cell.
    pub(crate) fn recognize(image: &RgbaImage, model_dir: Option<&Path>) -> Option<String> {
        let engine = engine(model_dir)?;

        let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let source = match ocrs::ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions()) {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "OCR image conversion failed");
                return Some(String::new());
            }
        };

        let input = match engine.prepare_input(source) {
            Ok(i) => i,
            Err(e) => {
                debug!(error = %e, "OCR input preparation failed");
                return Some(String::new());
            }
        };

        match engine.get_text(&input) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(error = %e, "OCR recognition failed");
                Some(String::new())
            }
        }
    }
}

#[cfg(not(feature = "table-ocr"))]
mod disabled {
    use std::path::Path;

    use image::RgbaImage;

    pub(crate) fn engine_available(_model_dir: Option<&Path>) -> bool {
        false
    }

    pub(crate) fn recognize(_image: &RgbaImage, _model_dir: Option<&Path>) -> Option<String> {
        None
    }
}
