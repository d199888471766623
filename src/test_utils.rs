pub mod test_helpers {
    use crate::models::user::{User, UserCreationInput};
    use crate::repositories::user_repository::{SqliteUserRepository, UserRepository};
    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
    use tempfile::NamedTempFile;

    /// Create a new in-memory SQLite database for testing
    pub async fn create_test_db() -> Result<SqlitePool, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Create a temporary file-based SQLite database for testing
    /// Useful when you need several connections onto the same data
    pub async fn create_test_db_file() -> Result<(SqlitePool, NamedTempFile), sqlx::Error> {
        let temp_file = NamedTempFile::new().map_err(sqlx::Error::Io)?;
        let db_path = temp_file
            .path()
            .to_str()
            .ok_or_else(|| sqlx::Error::Configuration("Invalid database path".into()))?;
        let database_url = format!("sqlite://{}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok((pool, temp_file))
    }

    pub fn creation_input(username: &str) -> UserCreationInput {
        UserCreationInput {
            username: username.to_string(),
            hashed_password: format!("hashed-{}", username),
            two_factor_secret: format!("secret-{}", username),
        }
    }

    /// Insert a test user through the repository
    pub async fn insert_test_user(
        repository: &SqliteUserRepository,
        username: &str,
    ) -> Result<User, crate::repositories::RepositoryError> {
        repository.create_user(&creation_input(username)).await
    }

    /// Overwrite timestamps directly, for exercising time-range filters
    pub async fn set_timestamps(
        pool: &SqlitePool,
        user_id: i64,
        created_on: i64,
        updated_on: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET created_on = ?, updated_on = ? WHERE id = ?")
            .bind(created_on)
            .bind(updated_on)
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Grant admin outside the repository, the only way it can happen
    pub async fn make_admin(pool: &SqlitePool, user_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET is_admin = 1 WHERE id = ?")
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(())
    }
}

// Re-export commonly used test functions at module level for convenience
// Note: This is test-only code. Panic on error is acceptable in tests.
#[cfg(test)]
pub async fn create_test_pool() -> sqlx::SqlitePool {
    match test_helpers::create_test_db().await {
        Ok(pool) => pool,
        Err(e) => panic!("Failed to create test pool: {}", e),
    }
}
