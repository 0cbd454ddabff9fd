//! Image attachment operations on behalf of the admin API.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{ImageOrigin, ProjectImage, User};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::service::ScriptoriumService;

impl ScriptoriumService {
    /// Store a directly-uploaded image as the last attachment of a project
    pub fn upload_image(
        &self,
        actor: &User,
        project_id: &str,
        content: &[u8],
    ) -> ServiceResult<ProjectImage> {
        self.get_project_authorized(actor, project_id)?;

        let max_size = self.config.limits.max_image_size_bytes;
        if content.len() as u64 > max_size {
            return Err(ServiceError::Processing(ProcessingError::FileTooLarge {
                size: content.len() as u64,
                max: max_size,
            }));
        }

        // Decoding validates the payload and gives dimensions and format
        let format = image::guess_format(content).map_err(|e| {
            ServiceError::Processing(ProcessingError::DocumentParse {
                source: Box::new(e),
            })
        })?;
        let decoded = image::load_from_memory(content).map_err(|e| {
            ServiceError::Processing(ProcessingError::DocumentParse {
                source: Box::new(e),
            })
        })?;

        let content_type = match format {
            image::ImageFormat::Png => "image/png",
            image::ImageFormat::Jpeg => "image/jpeg",
            image::ImageFormat::Gif => "image/gif",
            image::ImageFormat::WebP => "image/webp",
            image::ImageFormat::Bmp => "image/bmp",
            _ => {
                return Err(ServiceError::Processing(
                    ProcessingError::UnsupportedFormat {
                        format: format!("{:?}", format),
                    },
                ));
            }
        };

        let images_dir = self.images_dir(project_id);
        std::fs::create_dir_all(&images_dir)
            .map_err(|e| ServiceError::Processing(ProcessingError::Io(e)))?;

        let image_id = Uuid::new_v4().to_string();
        let extension = content_type.rsplit('/').next().unwrap_or("bin");
        let file_path = images_dir.join(format!("{}.{}", image_id, extension));
        std::fs::write(&file_path, content)
            .map_err(|e| ServiceError::Processing(ProcessingError::Io(e)))?;

        let record = ProjectImage {
            id: image_id,
            project_id: project_id.to_string(),
            internal_path: file_path.to_string_lossy().to_string(),
            content_type: content_type.to_string(),
            order_index: self.db.next_order_index(project_id)?,
            is_featured: false,
            width: Some(decoded.width()),
            height: Some(decoded.height()),
            origin: ImageOrigin::Uploaded,
            created_at: Utc::now(),
        };

        if let Err(e) = self.db.insert_project_image(&record) {
            let _ = std::fs::remove_file(&file_path);
            return Err(e);
        }

        info!(
            project_id = %project_id,
            image_id = %record.id,
            order_index = record.order_index,
            "Image uploaded"
        );

        Ok(record)
    }

    /// List a project's images in display order
    pub fn list_project_images(
        &self,
        actor: &User,
        project_id: &str,
    ) -> ServiceResult<Vec<ProjectImage>> {
        self.get_project_authorized(actor, project_id)?;
        self.db.get_project_images(project_id)
    }

    /// Apply an explicit display order
    pub fn reorder_images(
        &self,
        actor: &User,
        project_id: &str,
        ordered_ids: &[String],
    ) -> ServiceResult<Vec<ProjectImage>> {
        self.get_project_authorized(actor, project_id)?;

        if ordered_ids.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Image order must not be empty".to_string(),
            });
        }

        self.db.reorder_project_images(project_id, ordered_ids)?;
        self.db.get_project_images(project_id)
    }

    /// Designate a project's featured image
    pub fn set_featured_image(
        &self,
        actor: &User,
        project_id: &str,
        image_id: &str,
    ) -> ServiceResult<ProjectImage> {
        self.get_project_authorized(actor, project_id)?;

        if !self.db.set_featured_image(project_id, image_id)? {
            return Err(ServiceError::ImageNotFound {
                image_id: image_id.to_string(),
            });
        }

        self.db
            .get_project_image(project_id, image_id)?
            .ok_or_else(|| ServiceError::ImageNotFound {
                image_id: image_id.to_string(),
            })
    }

    /// Delete a single image and its blob
    pub fn delete_image(
        &self,
        actor: &User,
        project_id: &str,
        image_id: &str,
    ) -> ServiceResult<bool> {
        self.get_project_authorized(actor, project_id)?;

        match self.db.delete_project_image(project_id, image_id)? {
            Some(path) => {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path, error = %e, "Failed to delete image file");
                }
                info!(project_id = %project_id, image_id = %image_id, "Image deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete all extraction-derived images, keeping uploads
    pub fn delete_extracted_images(&self, actor: &User, project_id: &str) -> ServiceResult<usize> {
        self.get_project_authorized(actor, project_id)?;
        self.remove_extracted_images(project_id)
    }

    /// Shared with forced re-extraction: drop extracted rows and blobs
    pub(crate) fn remove_extracted_images(&self, project_id: &str) -> ServiceResult<usize> {
        let paths = self.db.delete_extracted_images(project_id)?;
        let count = paths.len();

        for path in paths {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path, error = %e, "Failed to delete image file");
            }
        }

        if count > 0 {
            info!(project_id = %project_id, count = count, "Deleted extracted images");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{faculty, test_service};
    use image::{ImageEncoder, Rgba, RgbaImage};

    fn png_bytes(size: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(size, size, Rgba([120, 40, 200, 255]));
        let mut bytes = Vec::new();
        image::codecs::png::PngEncoder::new(&mut bytes)
            .write_image(img.as_raw(), size, size, image::ExtendedColorType::Rgba8)
            .unwrap();
        bytes
    }

    #[test]
    fn test_upload_image_appends_in_order() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let project = service.create_project(&owner, "Gallery", None, None).unwrap();

        let first = service
            .upload_image(&owner, &project.id, &png_bytes(64))
            .unwrap();
        let second = service
            .upload_image(&owner, &project.id, &png_bytes(48))
            .unwrap();

        assert_eq!(first.order_index, 0);
        assert_eq!(second.order_index, 1);
        assert_eq!(first.content_type, "image/png");
        assert_eq!(first.width, Some(64));
        assert!(std::path::Path::new(&second.internal_path).exists());
    }

    #[test]
    fn test_upload_image_rejects_junk() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let project = service.create_project(&owner, "Gallery", None, None).unwrap();

        let result = service.upload_image(&owner, &project.id, b"not an image at all");
        assert!(result.is_err());
        assert_eq!(service.db.get_image_count(&project.id).unwrap(), 0);
    }

    #[test]
    fn test_featured_image_workflow() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let project = service.create_project(&owner, "Gallery", None, None).unwrap();

        let a = service.upload_image(&owner, &project.id, &png_bytes(64)).unwrap();
        let b = service.upload_image(&owner, &project.id, &png_bytes(64)).unwrap();

        service.set_featured_image(&owner, &project.id, &a.id).unwrap();
        let featured = service.set_featured_image(&owner, &project.id, &b.id).unwrap();
        assert!(featured.is_featured);

        assert_eq!(
            service.db.get_featured_image(&project.id).unwrap().unwrap().id,
            b.id
        );

        assert!(matches!(
            service.set_featured_image(&owner, &project.id, "missing"),
            Err(ServiceError::ImageNotFound { .. })
        ));
    }

    #[test]
    fn test_delete_image_removes_blob() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let project = service.create_project(&owner, "Gallery", None, None).unwrap();

        let image = service.upload_image(&owner, &project.id, &png_bytes(64)).unwrap();
        let path = image.internal_path.clone();
        assert!(std::path::Path::new(&path).exists());

        assert!(service.delete_image(&owner, &project.id, &image.id).unwrap());
        assert!(!std::path::Path::new(&path).exists());
        assert!(!service.delete_image(&owner, &project.id, &image.id).unwrap());
    }
}
