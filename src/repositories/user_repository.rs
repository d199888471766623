use crate::models::filter::QueryFilter;
use crate::models::user::{User, UserCreationInput, UserList};
use crate::queries::{users as queries, QueryBuildError, Statement};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqlitePool};
use std::{future::Future, time::Duration};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("User not found")]
    NotFound,
    #[error("User already exists")]
    AlreadyExists,
    #[error("Invalid user ID: {0}")]
    InvalidId(i64),
    #[error("Empty {0} provided")]
    EmptyInput(&'static str),
    #[error("Failed to build query: {0}")]
    QueryBuild(#[from] QueryBuildError),
    #[error("Timed out {0}")]
    Timeout(&'static str),
    #[error("Database error {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl RepositoryError {
    fn from_sqlx(context: &'static str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound,
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation() || db_err.message().contains("UNIQUE") =>
            {
                RepositoryError::AlreadyExists
            }
            source => RepositoryError::Database { context, source },
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, user_id: i64) -> RepositoryResult<User>;
    /// Non-archived user whose two-factor secret is still unverified.
    async fn get_user_with_unverified_two_factor_secret(
        &self,
        user_id: i64,
    ) -> RepositoryResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepositoryResult<User>;
    /// Non-archived users whose username starts with `username_prefix`.
    async fn search_for_users_by_username(
        &self,
        username_prefix: &str,
    ) -> RepositoryResult<Vec<User>>;
    /// Number of non-archived users matching the filter's time ranges.
    async fn get_user_count(&self, filter: &QueryFilter) -> RepositoryResult<i64>;
    /// One page of non-archived users, with the total matching count.
    async fn get_users(&self, filter: &QueryFilter) -> RepositoryResult<UserList>;
    async fn create_user(&self, input: &UserCreationInput) -> RepositoryResult<User>;
    /// Writes username, hashed password and two-factor secret for `user.id`.
    /// Every field is written, so `user` must be fully populated.
    async fn update_user(&self, user: &User) -> RepositoryResult<()>;
    async fn update_user_password(
        &self,
        user_id: i64,
        hashed_password: &str,
    ) -> RepositoryResult<()>;
    /// Replaces the secret and marks it unverified.
    async fn update_user_two_factor_secret(
        &self,
        user_id: i64,
        two_factor_secret: &str,
    ) -> RepositoryResult<()>;
    async fn mark_user_two_factor_secret_as_verified(&self, user_id: i64) -> RepositoryResult<()>;
    async fn archive_user(&self, user_id: i64) -> RepositoryResult<()>;
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
    query_timeout: Option<Duration>,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            query_timeout: None,
        }
    }

    /// Bounds every storage call made by this repository.
    pub fn with_query_timeout(mut self, query_timeout: Option<Duration>) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    async fn run<T, F>(&self, context: &'static str, operation: F) -> RepositoryResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let result = match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| RepositoryError::Timeout(context))?,
            None => operation.await,
        };

        result.map_err(|err| RepositoryError::from_sqlx(context, err))
    }

    async fn fetch_created_on(&self, user_id: i64) -> RepositoryResult<i64> {
        let mut statement = build(
            "created_on lookup",
            queries::build_get_created_on_query(user_id),
        )?;

        let row = self
            .run(
                "fetching created_on",
                statement.build().fetch_one(&self.pool),
            )
            .await?;

        row.try_get(0)
            .map_err(|err| RepositoryError::from_sqlx("scanning created_on", err))
    }
}

fn check_id(user_id: i64) -> RepositoryResult<()> {
    if user_id <= 0 {
        return Err(RepositoryError::InvalidId(user_id));
    }
    Ok(())
}

fn build(
    context: &'static str,
    built: Result<Statement, QueryBuildError>,
) -> RepositoryResult<Statement> {
    built.map_err(|err| {
        error!(context, error = %err, "building query");
        RepositoryError::QueryBuild(err)
    })
}

fn check_not_empty(value: &str, what: &'static str) -> RepositoryResult<()> {
    if value.is_empty() {
        return Err(RepositoryError::EmptyInput(what));
    }
    Ok(())
}

fn expect_rows_affected(rows_affected: u64) -> RepositoryResult<()> {
    if rows_affected == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

/// Pairs a fetched page with its total. A failed count fails the page.
async fn with_total_count<C>(
    filter: &QueryFilter,
    users: Vec<User>,
    count: C,
) -> RepositoryResult<UserList>
where
    C: Future<Output = RepositoryResult<i64>>,
{
    let total_count = count.await?;
    Ok(UserList::new(filter, users, total_count))
}

fn scan_user(row: &SqliteRow) -> RepositoryResult<User> {
    User::from_row(row).map_err(|err| RepositoryError::from_sqlx("scanning user", err))
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn get_user(&self, user_id: i64) -> RepositoryResult<User> {
        check_id(user_id)?;
        let mut statement = build("get user query", queries::build_get_user_query(user_id))?;

        debug!(user_id, "fetching user");
        let row = self
            .run(
                "fetching user",
                statement.build().fetch_optional(&self.pool),
            )
            .await?
            .ok_or(RepositoryError::NotFound)?;

        scan_user(&row)
    }

    async fn get_user_with_unverified_two_factor_secret(
        &self,
        user_id: i64,
    ) -> RepositoryResult<User> {
        check_id(user_id)?;
        let mut statement = build(
            "get user with unverified two factor secret query",
            queries::build_get_user_with_unverified_two_factor_secret_query(user_id),
        )?;

        debug!(user_id, "fetching user with unverified two factor secret");
        let row = self
            .run(
                "fetching user with unverified two factor secret",
                statement.build().fetch_optional(&self.pool),
            )
            .await?
            .ok_or(RepositoryError::NotFound)?;

        scan_user(&row)
    }

    async fn get_user_by_username(&self, username: &str) -> RepositoryResult<User> {
        let mut statement = build(
            "get user by username query",
            queries::build_get_user_by_username_query(username),
        )?;

        debug!(username, "fetching user by username");
        let row = self
            .run(
                "fetching user by username",
                statement.build().fetch_optional(&self.pool),
            )
            .await?
            .ok_or(RepositoryError::NotFound)?;

        scan_user(&row)
    }

    async fn search_for_users_by_username(
        &self,
        username_prefix: &str,
    ) -> RepositoryResult<Vec<User>> {
        check_not_empty(username_prefix, "username search")?;
        let mut statement = build(
            "search users by username query",
            queries::build_search_for_users_by_username_query(username_prefix),
        )?;

        debug!(username_prefix, "searching users by username");
        let rows = self
            .run(
                "searching users by username",
                statement.build().fetch_all(&self.pool),
            )
            .await?;

        rows.iter().map(scan_user).collect()
    }

    async fn get_user_count(&self, filter: &QueryFilter) -> RepositoryResult<i64> {
        let mut statement = build(
            "user count query",
            queries::build_get_user_count_query(filter),
        )?;

        let row = self
            .run("counting users", statement.build().fetch_one(&self.pool))
            .await?;

        row.try_get(0)
            .map_err(|err| RepositoryError::from_sqlx("scanning user count", err))
    }

    async fn get_users(&self, filter: &QueryFilter) -> RepositoryResult<UserList> {
        let mut statement = build("get users query", queries::build_get_users_query(filter))?;

        debug!(page = filter.page(), limit = filter.limit(), "fetching users");
        let rows = self
            .run("fetching users", statement.build().fetch_all(&self.pool))
            .await?;

        let users = rows
            .iter()
            .map(scan_user)
            .collect::<RepositoryResult<Vec<_>>>()?;

        with_total_count(filter, users, self.get_user_count(filter)).await
    }

    async fn create_user(&self, input: &UserCreationInput) -> RepositoryResult<User> {
        let mut statement =
            build("create user query", queries::build_create_user_query(input))?;

        let result = self
            .run("creating user", statement.build().execute(&self.pool))
            .await?;

        let mut user = User {
            id: result.last_insert_rowid(),
            username: input.username.clone(),
            hashed_password: input.hashed_password.clone(),
            password_last_changed_on: None,
            two_factor_secret: input.two_factor_secret.clone(),
            two_factor_secret_verified_on: None,
            is_admin: false,
            created_on: 0,
            updated_on: None,
            archived_on: None,
        };

        match self.fetch_created_on(user.id).await {
            Ok(created_on) => user.created_on = created_on,
            Err(err) => warn!(
                user_id = user.id,
                error = %err,
                "could not read created_on for new user"
            ),
        }

        debug!(user_id = user.id, "created user");
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> RepositoryResult<()> {
        check_id(user.id)?;
        let mut statement =
            build("update user query", queries::build_update_user_query(user))?;

        let result = self
            .run("updating user", statement.build().execute(&self.pool))
            .await?;

        expect_rows_affected(result.rows_affected())
    }

    async fn update_user_password(
        &self,
        user_id: i64,
        hashed_password: &str,
    ) -> RepositoryResult<()> {
        check_id(user_id)?;
        let mut statement = build(
            "update user password query",
            queries::build_update_user_password_query(user_id, hashed_password),
        )?;

        let result = self
            .run(
                "updating user password",
                statement.build().execute(&self.pool),
            )
            .await?;

        expect_rows_affected(result.rows_affected())
    }

    async fn update_user_two_factor_secret(
        &self,
        user_id: i64,
        two_factor_secret: &str,
    ) -> RepositoryResult<()> {
        check_id(user_id)?;
        check_not_empty(two_factor_secret, "two factor secret")?;
        let mut statement = build(
            "update user two factor secret query",
            queries::build_update_user_two_factor_secret_query(user_id, two_factor_secret),
        )?;

        let result = self
            .run(
                "updating user two factor secret",
                statement.build().execute(&self.pool),
            )
            .await?;

        expect_rows_affected(result.rows_affected())?;
        info!(user_id, "user two factor secret updated");
        Ok(())
    }

    async fn mark_user_two_factor_secret_as_verified(&self, user_id: i64) -> RepositoryResult<()> {
        check_id(user_id)?;
        let mut statement = build(
            "verify user two factor secret query",
            queries::build_mark_two_factor_secret_as_verified_query(user_id),
        )?;

        let result = self
            .run(
                "verifying user two factor secret",
                statement.build().execute(&self.pool),
            )
            .await?;

        expect_rows_affected(result.rows_affected())?;
        info!(user_id, "user two factor secret verified");
        Ok(())
    }

    async fn archive_user(&self, user_id: i64) -> RepositoryResult<()> {
        check_id(user_id)?;
        let mut statement =
            build("archive user query", queries::build_archive_user_query(user_id))?;

        let result = self
            .run("archiving user", statement.build().execute(&self.pool))
            .await?;

        expect_rows_affected(result.rows_affected())?;
        debug!(user_id, "archived user");
        Ok(())
    }
}
