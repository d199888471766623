use serde::Serialize;
use sqlx::{sqlite::SqliteRow, FromRow, Row};

use super::filter::QueryFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub password_last_changed_on: Option<i64>,
    #[serde(skip_serializing)]
    pub two_factor_secret: String,
    pub two_factor_secret_verified_on: Option<i64>,
    pub is_admin: bool,
    pub created_on: i64,
    pub updated_on: Option<i64>,
    pub archived_on: Option<i64>,
}

impl User {
    pub fn is_archived(&self) -> bool {
        self.archived_on.is_some()
    }

    pub fn has_verified_two_factor_secret(&self) -> bool {
        self.two_factor_secret_verified_on.is_some()
    }
}

/// Scans a row selected with `USERS_TABLE_COLUMNS`, by position.
impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(User {
            id: row.try_get(0)?,
            username: row.try_get(1)?,
            hashed_password: row.try_get(2)?,
            password_last_changed_on: row.try_get(3)?,
            two_factor_secret: row.try_get(4)?,
            two_factor_secret_verified_on: row.try_get(5)?,
            is_admin: row.try_get(6)?,
            created_on: row.try_get(7)?,
            updated_on: row.try_get(8)?,
            archived_on: row.try_get(9)?,
        })
    }
}

/// Fields accepted when inserting a user. Inserted users are never admins,
/// so there is no admin flag here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCreationInput {
    pub username: String,
    pub hashed_password: String,
    pub two_factor_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserList {
    pub pagination: Pagination,
    pub users: Vec<User>,
}

impl UserList {
    pub fn new(filter: &QueryFilter, users: Vec<User>, total_count: i64) -> Self {
        Self {
            pagination: Pagination {
                page: filter.page(),
                limit: filter.limit(),
                total_count,
            },
            users,
        }
    }
}
