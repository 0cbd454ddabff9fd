//! Image attachment operations: insert, ordering, featured flag, deletion.

use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::ProjectImage;
use crate::error::{DatabaseError, ServiceResult};

const IMAGE_COLUMNS: &str = "id, project_id, internal_path, content_type, order_index, \
     is_featured, width, height, origin, created_at";

impl Database {
    /// Insert an image attachment
    pub fn insert_project_image(&self, image: &ProjectImage) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO project_images (id, project_id, internal_path, content_type, order_index,
                is_featured, width, height, origin, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                image.id,
                image.project_id,
                image.internal_path,
                image.content_type,
                image.order_index,
                image.is_featured,
                image.width.map(|v| v as i32),
                image.height.map(|v| v as i32),
                image.origin.as_str(),
                image.created_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get an image belonging to a specific project
    pub fn get_project_image(
        &self,
        project_id: &str,
        image_id: &str,
    ) -> ServiceResult<Option<ProjectImage>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM project_images WHERE id = ?1 AND project_id = ?2",
                IMAGE_COLUMNS
            ),
            params![image_id, project_id],
            ProjectImage::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Get all images for a project in display order
    pub fn get_project_images(&self, project_id: &str) -> ServiceResult<Vec<ProjectImage>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM project_images WHERE project_id = ?1 ORDER BY order_index",
                IMAGE_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![project_id], ProjectImage::from_row)
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// Get the featured image for a project, if any
    pub fn get_featured_image(&self, project_id: &str) -> ServiceResult<Option<ProjectImage>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM project_images WHERE project_id = ?1 AND is_featured = 1 \
                 ORDER BY order_index LIMIT 1",
                IMAGE_COLUMNS
            ),
            params![project_id],
            ProjectImage::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Next free order index for a project (0 for the first image)
    pub fn next_order_index(&self, project_id: &str) -> ServiceResult<i32> {
        let conn = self.conn.lock().unwrap();

        let max: Option<i32> = conn
            .query_row(
                "SELECT MAX(order_index) FROM project_images WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(max.map_or(0, |m| m + 1))
    }

    /// Rewrite display order from an explicit id sequence. Ids not present
    /// in the sequence keep their relative order after the reordered block.
    pub fn reorder_project_images(
        &self,
        project_id: &str,
        ordered_ids: &[String],
    ) -> ServiceResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let mut updated = 0;
        {
            let mut stmt = tx
                .prepare(
                    "UPDATE project_images SET order_index = ?1 \
                     WHERE id = ?2 AND project_id = ?3",
                )
                .map_err(DatabaseError::Query)?;

            for (index, image_id) in ordered_ids.iter().enumerate() {
                updated += stmt
                    .execute(params![index as i32, image_id, project_id])
                    .map_err(DatabaseError::Query)?;
            }

            // Move any remaining images after the reordered block
            let remaining: Vec<String> = {
                let mut select = tx
                    .prepare(
                        "SELECT id FROM project_images WHERE project_id = ?1 ORDER BY order_index",
                    )
                    .map_err(DatabaseError::Query)?;
                let rows = select
                    .query_map(params![project_id], |row| row.get::<_, String>(0))
                    .map_err(DatabaseError::Query)?;
                rows.filter_map(|r| r.ok())
                    .filter(|id| !ordered_ids.contains(id))
                    .collect()
            };

            for (offset, image_id) in remaining.iter().enumerate() {
                stmt.execute(params![
                    (ordered_ids.len() + offset) as i32,
                    image_id,
                    project_id
                ])
                .map_err(DatabaseError::Query)?;
            }
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(updated)
    }

    /// Mark an image as featured, clearing the flag on any other image of
    /// the same project in the same transaction.
    pub fn set_featured_image(&self, project_id: &str, image_id: &str) -> ServiceResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            "UPDATE project_images SET is_featured = 0 WHERE project_id = ?1",
            params![project_id],
        )
        .map_err(DatabaseError::Query)?;

        let rows = tx
            .execute(
                "UPDATE project_images SET is_featured = 1 \
                 WHERE id = ?1 AND project_id = ?2",
                params![image_id, project_id],
            )
            .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(rows > 0)
    }

    /// Delete a single image, returning its blob path for file cleanup
    pub fn delete_project_image(
        &self,
        project_id: &str,
        image_id: &str,
    ) -> ServiceResult<Option<String>> {
        let conn = self.conn.lock().unwrap();

        let path: Option<String> = conn
            .query_row(
                "SELECT internal_path FROM project_images WHERE id = ?1 AND project_id = ?2",
                params![image_id, project_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        if path.is_some() {
            conn.execute(
                "DELETE FROM project_images WHERE id = ?1 AND project_id = ?2",
                params![image_id, project_id],
            )
            .map_err(DatabaseError::Query)?;
        }

        Ok(path)
    }

    /// Delete all extraction-derived images for a project (origin figure or
    /// table), returning their blob paths. Uploaded images are untouched.
    pub fn delete_extracted_images(&self, project_id: &str) -> ServiceResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let paths: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT internal_path FROM project_images \
                     WHERE project_id = ?1 AND origin IN ('figure', 'table')",
                )
                .map_err(DatabaseError::Query)?;
            let rows = stmt
                .query_map(params![project_id], |row| row.get(0))
                .map_err(DatabaseError::Query)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(DatabaseError::Query)?
        };

        conn.execute(
            "DELETE FROM project_images WHERE project_id = ?1 AND origin IN ('figure', 'table')",
            params![project_id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(paths)
    }

    /// Get count of images for a project
    pub fn get_image_count(&self, project_id: &str) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM project_images WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::db::Database;
    use crate::db::models::{ImageOrigin, ProjectImage, Role};
    use crate::db::tests::{insert_test_project, insert_test_user};

    fn insert_image(db: &Database, project_id: &str, origin: ImageOrigin) -> String {
        let order_index = db.next_order_index(project_id).unwrap();
        let image = ProjectImage {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            internal_path: format!("/tmp/{}.png", Uuid::new_v4()),
            content_type: "image/png".to_string(),
            order_index,
            is_featured: false,
            width: Some(64),
            height: Some(64),
            origin,
            created_at: Utc::now(),
        };
        db.insert_project_image(&image).unwrap();
        image.id
    }

    fn setup() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        insert_test_user(&db, "u1", Role::Faculty);
        let project_id = insert_test_project(&db, "u1", "With Images");
        (db, project_id)
    }

    #[test]
    fn test_order_index_appends_contiguously() {
        let (db, project_id) = setup();
        for _ in 0..3 {
            insert_image(&db, &project_id, ImageOrigin::Uploaded);
        }

        let images = db.get_project_images(&project_id).unwrap();
        let indices: Vec<i32> = images.iter().map(|i| i.order_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_featured_flag_is_exclusive() {
        let (db, project_id) = setup();
        let first = insert_image(&db, &project_id, ImageOrigin::Uploaded);
        let second = insert_image(&db, &project_id, ImageOrigin::Uploaded);

        assert!(db.set_featured_image(&project_id, &first).unwrap());
        assert!(db.set_featured_image(&project_id, &second).unwrap());

        let featured = db.get_featured_image(&project_id).unwrap().unwrap();
        assert_eq!(featured.id, second);

        let flagged: Vec<_> = db
            .get_project_images(&project_id)
            .unwrap()
            .into_iter()
            .filter(|i| i.is_featured)
            .collect();
        assert_eq!(flagged.len(), 1);
    }

    #[test]
    fn test_reorder_moves_unlisted_images_to_back() {
        let (db, project_id) = setup();
        let a = insert_image(&db, &project_id, ImageOrigin::Uploaded);
        let b = insert_image(&db, &project_id, ImageOrigin::Uploaded);
        let c = insert_image(&db, &project_id, ImageOrigin::Uploaded);

        db.reorder_project_images(&project_id, &[c.clone(), a.clone()])
            .unwrap();

        let ordered: Vec<String> = db
            .get_project_images(&project_id)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ordered, vec![c, a, b]);
    }

    #[test]
    fn test_delete_extracted_keeps_uploaded() {
        let (db, project_id) = setup();
        insert_image(&db, &project_id, ImageOrigin::Uploaded);
        insert_image(&db, &project_id, ImageOrigin::Figure);
        insert_image(&db, &project_id, ImageOrigin::Table);

        let removed = db.delete_extracted_images(&project_id).unwrap();
        assert_eq!(removed.len(), 2);

        let remaining = db.get_project_images(&project_id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].origin, ImageOrigin::Uploaded);
    }

    #[test]
    fn test_image_lookup_is_scoped_to_project() {
        let (db, project_id) = setup();
        let other_project = insert_test_project(&db, "u1", "Other");
        let image_id = insert_image(&db, &project_id, ImageOrigin::Uploaded);

        assert!(db.get_project_image(&project_id, &image_id).unwrap().is_some());
        assert!(db.get_project_image(&other_project, &image_id).unwrap().is_none());
    }
}
