//! Statements against the `users` table.

use super::builder::{Insert, QueryBuildError, Select, SortOrder, Statement, Update};
use crate::models::filter::QueryFilter;
use crate::models::user::{User, UserCreationInput};

pub const USERS_TABLE: &str = "users";

/// Selected by every user read, in the order `User::from_row` scans them.
pub const USERS_TABLE_COLUMNS: [&str; 10] = [
    "users.id",
    "users.username",
    "users.hashed_password",
    "users.password_last_changed_on",
    "users.two_factor_secret",
    "users.two_factor_secret_verified_on",
    "users.is_admin",
    "users.created_on",
    "users.updated_on",
    "users.archived_on",
];

const CURRENT_UNIX_TIME: &str = "CAST(strftime('%s', 'now') AS INTEGER)";

pub fn build_get_user_query(user_id: i64) -> Result<Statement, QueryBuildError> {
    Select::columns(USERS_TABLE, USERS_TABLE_COLUMNS)
        .where_eq("users.id", user_id)
        .finish()
}

/// Only matches non-archived users whose secret has not been verified yet.
pub fn build_get_user_with_unverified_two_factor_secret_query(
    user_id: i64,
) -> Result<Statement, QueryBuildError> {
    Select::columns(USERS_TABLE, USERS_TABLE_COLUMNS)
        .where_null("users.archived_on")
        .where_null("users.two_factor_secret_verified_on")
        .where_eq("users.id", user_id)
        .finish()
}

pub fn build_get_user_by_username_query(username: &str) -> Result<Statement, QueryBuildError> {
    Select::columns(USERS_TABLE, USERS_TABLE_COLUMNS)
        .where_eq("users.username", username.to_string())
        .finish()
}

pub fn build_search_for_users_by_username_query(
    username_prefix: &str,
) -> Result<Statement, QueryBuildError> {
    Select::columns(USERS_TABLE, USERS_TABLE_COLUMNS)
        .where_starts_with("users.username", username_prefix)
        .where_null("users.archived_on")
        .order_by("users.id", SortOrder::Asc)
        .finish()
}

pub fn build_get_created_on_query(user_id: i64) -> Result<Statement, QueryBuildError> {
    Select::columns(USERS_TABLE, ["users.created_on"])
        .where_eq("users.id", user_id)
        .finish()
}

/// Counts non-archived users; paging in `filter` is ignored.
pub fn build_get_user_count_query(filter: &QueryFilter) -> Result<Statement, QueryBuildError> {
    let builder = Select::count(USERS_TABLE, "users.id").where_null("users.archived_on");

    filter.apply_conditions(builder, USERS_TABLE).finish()
}

pub fn build_get_users_query(filter: &QueryFilter) -> Result<Statement, QueryBuildError> {
    let builder =
        Select::columns(USERS_TABLE, USERS_TABLE_COLUMNS).where_null("users.archived_on");

    filter.apply_to_select(builder, USERS_TABLE).finish()
}

pub fn build_create_user_query(input: &UserCreationInput) -> Result<Statement, QueryBuildError> {
    Insert::into_table(
        USERS_TABLE,
        ["username", "hashed_password", "two_factor_secret", "is_admin"],
    )
    .value(input.username.clone())
    .value(input.hashed_password.clone())
    .value(input.two_factor_secret.clone())
    .value(false)
    .finish()
}

/// Rewrites the mutable fields of `user`, keyed by `user.id`.
pub fn build_update_user_query(user: &User) -> Result<Statement, QueryBuildError> {
    Update::table(USERS_TABLE)
        .set("username", user.username.clone())
        .set("hashed_password", user.hashed_password.clone())
        .set("two_factor_secret", user.two_factor_secret.clone())
        .set_expr("updated_on", CURRENT_UNIX_TIME)
        .where_eq("id", user.id)
        .finish()
}

pub fn build_update_user_password_query(
    user_id: i64,
    hashed_password: &str,
) -> Result<Statement, QueryBuildError> {
    Update::table(USERS_TABLE)
        .set("hashed_password", hashed_password.to_string())
        .set_expr("password_last_changed_on", CURRENT_UNIX_TIME)
        .set_expr("updated_on", CURRENT_UNIX_TIME)
        .where_eq("id", user_id)
        .finish()
}

/// Replaces the secret and clears its verification.
pub fn build_update_user_two_factor_secret_query(
    user_id: i64,
    two_factor_secret: &str,
) -> Result<Statement, QueryBuildError> {
    Update::table(USERS_TABLE)
        .set("two_factor_secret", two_factor_secret.to_string())
        .set_expr("two_factor_secret_verified_on", "NULL")
        .set_expr("updated_on", CURRENT_UNIX_TIME)
        .where_null("archived_on")
        .where_eq("id", user_id)
        .finish()
}

pub fn build_mark_two_factor_secret_as_verified_query(
    user_id: i64,
) -> Result<Statement, QueryBuildError> {
    Update::table(USERS_TABLE)
        .set_expr("two_factor_secret_verified_on", CURRENT_UNIX_TIME)
        .set_expr("updated_on", CURRENT_UNIX_TIME)
        .where_null("archived_on")
        .where_eq("id", user_id)
        .finish()
}

pub fn build_archive_user_query(user_id: i64) -> Result<Statement, QueryBuildError> {
    Update::table(USERS_TABLE)
        .set_expr("updated_on", CURRENT_UNIX_TIME)
        .set_expr("archived_on", CURRENT_UNIX_TIME)
        .where_eq("id", user_id)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELECT_USERS: &str = "SELECT users.id, users.username, users.hashed_password, users.password_last_changed_on, users.two_factor_secret, users.two_factor_secret_verified_on, users.is_admin, users.created_on, users.updated_on, users.archived_on FROM users";

    fn example_user() -> User {
        User {
            id: 42,
            username: "frosty".to_string(),
            hashed_password: "$argon2id$hash".to_string(),
            password_last_changed_on: None,
            two_factor_secret: "secret".to_string(),
            two_factor_secret_verified_on: None,
            is_admin: false,
            created_on: 1_600_000_000,
            updated_on: None,
            archived_on: None,
        }
    }

    fn placeholders(statement: &Statement) -> usize {
        statement.sql().matches('?').count()
    }

    #[test]
    fn get_user_query() {
        let statement = build_get_user_query(42).unwrap();

        assert_eq!(
            statement.sql(),
            format!("{} WHERE users.id = ?", SELECT_USERS)
        );
        assert_eq!(placeholders(&statement), 1);
    }

    #[test]
    fn get_user_with_unverified_two_factor_secret_query() {
        let statement = build_get_user_with_unverified_two_factor_secret_query(42).unwrap();

        assert_eq!(
            statement.sql(),
            format!(
                "{} WHERE users.archived_on IS NULL AND users.two_factor_secret_verified_on IS NULL AND users.id = ?",
                SELECT_USERS
            )
        );
        assert_eq!(placeholders(&statement), 1);
    }

    #[test]
    fn get_user_by_username_query() {
        let statement = build_get_user_by_username_query("frosty").unwrap();

        assert_eq!(
            statement.sql(),
            format!("{} WHERE users.username = ?", SELECT_USERS)
        );
        assert_eq!(placeholders(&statement), 1);
    }

    #[test]
    fn search_for_users_by_username_query() {
        let statement = build_search_for_users_by_username_query("fro").unwrap();

        assert_eq!(
            statement.sql(),
            format!(
                r"{} WHERE users.username LIKE ? || '%' ESCAPE '\' AND users.archived_on IS NULL ORDER BY users.id ASC",
                SELECT_USERS
            )
        );
        assert_eq!(placeholders(&statement), 1);
    }

    #[test]
    fn get_created_on_query() {
        let statement = build_get_created_on_query(42).unwrap();

        assert_eq!(
            statement.sql(),
            "SELECT users.created_on FROM users WHERE users.id = ?"
        );
    }

    #[test]
    fn user_count_query_with_default_filter() {
        let statement = build_get_user_count_query(&QueryFilter::default()).unwrap();

        assert_eq!(
            statement.sql(),
            "SELECT COUNT(users.id) FROM users WHERE users.archived_on IS NULL"
        );
        assert_eq!(placeholders(&statement), 0);
    }

    #[test]
    fn user_count_query_ignores_paging() {
        let filter = QueryFilter {
            page: 4,
            limit: 7,
            created_after: Some(100),
            ..Default::default()
        };
        let statement = build_get_user_count_query(&filter).unwrap();

        assert_eq!(
            statement.sql(),
            "SELECT COUNT(users.id) FROM users WHERE users.archived_on IS NULL AND users.created_on > ?"
        );
        assert_eq!(placeholders(&statement), 1);
    }

    #[test]
    fn users_query_with_default_filter() {
        let statement = build_get_users_query(&QueryFilter::default()).unwrap();

        assert_eq!(
            statement.sql(),
            format!(
                "{} WHERE users.archived_on IS NULL ORDER BY users.id ASC LIMIT 20",
                SELECT_USERS
            )
        );
        assert_eq!(placeholders(&statement), 0);
    }

    #[test]
    fn users_query_with_fleshed_out_filter() {
        let filter = QueryFilter {
            page: 10,
            limit: 20,
            created_after: Some(1),
            created_before: Some(2),
            updated_after: Some(3),
            updated_before: Some(4),
            sort: SortOrder::Desc,
        };
        let statement = build_get_users_query(&filter).unwrap();

        assert_eq!(
            statement.sql(),
            format!(
                "{} WHERE users.archived_on IS NULL AND users.created_on > ? AND users.created_on < ? AND users.updated_on > ? AND users.updated_on < ? ORDER BY users.id DESC LIMIT 20 OFFSET 180",
                SELECT_USERS
            )
        );
        assert_eq!(placeholders(&statement), 4);
    }

    #[test]
    fn count_and_list_share_conditions() {
        let filter = QueryFilter {
            created_after: Some(1),
            updated_before: Some(4),
            ..Default::default()
        };
        let count = build_get_user_count_query(&filter).unwrap();
        let list = build_get_users_query(&filter).unwrap();

        let conditions = |sql: &str| {
            let start = sql.find(" WHERE ").unwrap();
            let end = sql.find(" ORDER BY ").unwrap_or(sql.len());
            sql[start..end].to_string()
        };
        assert_eq!(conditions(count.sql()), conditions(list.sql()));
    }

    #[test]
    fn create_user_query_forces_admin_off() {
        let user = example_user();
        let input = UserCreationInput {
            username: user.username.clone(),
            hashed_password: user.hashed_password.clone(),
            two_factor_secret: user.two_factor_secret.clone(),
        };
        let statement = build_create_user_query(&input).unwrap();

        assert_eq!(
            statement.sql(),
            "INSERT INTO users (username, hashed_password, two_factor_secret, is_admin) VALUES (?, ?, ?, ?)"
        );
        assert_eq!(placeholders(&statement), 4);
    }

    #[test]
    fn update_user_query_never_touches_admin_flag() {
        let mut user = example_user();
        user.is_admin = true;
        let statement = build_update_user_query(&user).unwrap();

        assert_eq!(
            statement.sql(),
            "UPDATE users SET username = ?, hashed_password = ?, two_factor_secret = ?, updated_on = CAST(strftime('%s', 'now') AS INTEGER) WHERE id = ?"
        );
        assert!(!statement.sql().contains("is_admin"));
        assert_eq!(placeholders(&statement), 4);
    }

    #[test]
    fn update_user_password_query() {
        let statement = build_update_user_password_query(42, "new-hash").unwrap();

        assert_eq!(
            statement.sql(),
            "UPDATE users SET hashed_password = ?, password_last_changed_on = CAST(strftime('%s', 'now') AS INTEGER), updated_on = CAST(strftime('%s', 'now') AS INTEGER) WHERE id = ?"
        );
        assert_eq!(placeholders(&statement), 2);
    }

    #[test]
    fn update_user_two_factor_secret_query() {
        let statement = build_update_user_two_factor_secret_query(42, "rotated").unwrap();

        assert_eq!(
            statement.sql(),
            "UPDATE users SET two_factor_secret = ?, two_factor_secret_verified_on = NULL, updated_on = CAST(strftime('%s', 'now') AS INTEGER) WHERE archived_on IS NULL AND id = ?"
        );
        assert_eq!(placeholders(&statement), 2);
    }

    #[test]
    fn mark_two_factor_secret_as_verified_query() {
        let statement = build_mark_two_factor_secret_as_verified_query(42).unwrap();

        assert_eq!(
            statement.sql(),
            "UPDATE users SET two_factor_secret_verified_on = CAST(strftime('%s', 'now') AS INTEGER), updated_on = CAST(strftime('%s', 'now') AS INTEGER) WHERE archived_on IS NULL AND id = ?"
        );
        assert_eq!(placeholders(&statement), 1);
    }

    #[test]
    fn archive_user_query() {
        let statement = build_archive_user_query(42).unwrap();

        assert_eq!(
            statement.sql(),
            "UPDATE users SET updated_on = CAST(strftime('%s', 'now') AS INTEGER), archived_on = CAST(strftime('%s', 'now') AS INTEGER) WHERE id = ?"
        );
        assert_eq!(placeholders(&statement), 1);
    }
}
