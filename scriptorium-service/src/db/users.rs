//! Account lookups. There is no session management; handlers resolve the
//! acting user per request.

use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::User;
use crate::error::{DatabaseError, ServiceResult};

const USER_COLUMNS: &str = "id, display_name, email, role, created_at";

impl Database {
    /// Insert a user
    pub fn insert_user(&self, user: &User) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO users (id, display_name, email, role, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.display_name,
                user.email,
                user.role.as_str(),
                user.created_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a user by ID
    pub fn get_user(&self, id: &str) -> ServiceResult<Option<User>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            User::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// List all users
    pub fn list_users(&self) -> ServiceResult<Vec<User>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users ORDER BY display_name",
                USER_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map([], User::from_row)
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::db::models::Role;
    use crate::db::tests::insert_test_user;

    #[test]
    fn test_user_round_trip() {
        let db = Database::open_in_memory().unwrap();
        insert_test_user(&db, "u1", Role::MainCoordinator);

        let user = db.get_user("u1").unwrap().unwrap();
        assert_eq!(user.role, Role::MainCoordinator);
        assert!(db.get_user("missing").unwrap().is_none());
    }
}
