use crate::models::filter::QueryFilter;
use crate::models::user::{User, UserCreationInput, UserList};
use crate::repositories::user_repository::{RepositoryError, UserRepository};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use std::sync::Arc;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_USERNAME_LENGTH: usize = 128;
const TWO_FACTOR_SECRET_BYTES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Invalid username")]
    InvalidUsername,
    #[error("Password too weak (minimum 8 characters)")]
    WeakPassword,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("User not found")]
    UserNotFound,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("No unverified two factor secret for this user")]
    NoPendingTwoFactorSecret,
    #[error("Password hashing failed: {0}")]
    HashingError(String),
    #[error("Repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
}

pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub password_confirm: Option<String>,
}

pub struct UpdatePasswordRequest {
    pub user_id: i64,
    pub new_password: String,
    pub new_password_confirm: Option<String>,
}

fn map_repository_error(err: RepositoryError) -> UserServiceError {
    match err {
        RepositoryError::NotFound => UserServiceError::UserNotFound,
        RepositoryError::AlreadyExists => UserServiceError::UsernameTaken,
        other => UserServiceError::RepositoryError(other),
    }
}

pub struct UserService {
    repository: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repository: Arc<dyn UserRepository>) -> Self {
        Self { repository }
    }

    pub async fn create_user(&self, request: CreateUserRequest) -> Result<User, UserServiceError> {
        let username = self.validate_username(&request.username)?;

        // Validate password confirmation if provided
        if let Some(ref confirm) = request.password_confirm {
            if request.password != *confirm {
                return Err(UserServiceError::PasswordMismatch);
            }
        }

        self.validate_password(&request.password)?;

        let input = UserCreationInput {
            username,
            hashed_password: self.hash_password(&request.password)?,
            two_factor_secret: generate_two_factor_secret(),
        };

        self.repository
            .create_user(&input)
            .await
            .map_err(map_repository_error)
    }

    pub async fn get_user(&self, id: i64) -> Result<User, UserServiceError> {
        self.repository
            .get_user(id)
            .await
            .map_err(map_repository_error)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<User, UserServiceError> {
        self.repository
            .get_user_by_username(username)
            .await
            .map_err(map_repository_error)
    }

    pub async fn list_users(&self, filter: &QueryFilter) -> Result<UserList, UserServiceError> {
        Ok(self.repository.get_users(filter).await?)
    }

    pub async fn count_users(&self, filter: &QueryFilter) -> Result<i64, UserServiceError> {
        Ok(self.repository.get_user_count(filter).await?)
    }

    pub async fn rename_user(&self, id: i64, new_username: &str) -> Result<User, UserServiceError> {
        let username = self.validate_username(new_username)?;

        let mut user = self.get_user(id).await?;
        if user.username == username {
            return Ok(user);
        }
        user.username = username;

        self.repository
            .update_user(&user)
            .await
            .map_err(map_repository_error)?;

        Ok(user)
    }

    pub async fn update_password(
        &self,
        request: UpdatePasswordRequest,
    ) -> Result<(), UserServiceError> {
        // Validate password confirmation if provided
        if let Some(ref confirm) = request.new_password_confirm {
            if request.new_password != *confirm {
                return Err(UserServiceError::PasswordMismatch);
            }
        }

        self.validate_password(&request.new_password)?;
        let password_hash = self.hash_password(&request.new_password)?;

        self.repository
            .update_user_password(request.user_id, &password_hash)
            .await
            .map_err(map_repository_error)
    }

    pub async fn archive_user(&self, id: i64) -> Result<(), UserServiceError> {
        self.repository
            .archive_user(id)
            .await
            .map_err(map_repository_error)
    }

    pub async fn search_users(&self, username_prefix: &str) -> Result<Vec<User>, UserServiceError> {
        Ok(self
            .repository
            .search_for_users_by_username(username_prefix.trim())
            .await?)
    }

    /// Issues a fresh two-factor secret for an active user and returns it.
    /// The new secret starts out unverified.
    pub async fn rotate_two_factor_secret(&self, id: i64) -> Result<String, UserServiceError> {
        let secret = generate_two_factor_secret();

        self.repository
            .update_user_two_factor_secret(id, &secret)
            .await
            .map_err(map_repository_error)?;

        Ok(secret)
    }

    pub async fn confirm_two_factor_secret(&self, id: i64) -> Result<User, UserServiceError> {
        match self
            .repository
            .get_user_with_unverified_two_factor_secret(id)
            .await
        {
            Ok(_) => {}
            Err(RepositoryError::NotFound) => {
                return Err(UserServiceError::NoPendingTwoFactorSecret)
            }
            Err(e) => return Err(UserServiceError::RepositoryError(e)),
        }

        self.repository
            .mark_user_two_factor_secret_as_verified(id)
            .await
            .map_err(map_repository_error)?;

        self.get_user(id).await
    }

    /// Checks a username/password pair. Archived users cannot authenticate.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        let user = match self.repository.get_user_by_username(username).await {
            Ok(user) => user,
            Err(RepositoryError::NotFound) => return Err(UserServiceError::InvalidCredentials),
            Err(e) => return Err(UserServiceError::RepositoryError(e)),
        };

        if user.is_archived() || !self.verify_password(password, &user.hashed_password) {
            return Err(UserServiceError::InvalidCredentials);
        }

        Ok(user)
    }

    fn validate_username(&self, username: &str) -> Result<String, UserServiceError> {
        let username = username.trim();
        if username.is_empty()
            || username.chars().count() > MAX_USERNAME_LENGTH
            || username.chars().any(char::is_whitespace)
        {
            return Err(UserServiceError::InvalidUsername);
        }
        Ok(username.to_string())
    }

    fn validate_password(&self, password: &str) -> Result<(), UserServiceError> {
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(UserServiceError::WeakPassword);
        }
        Ok(())
    }

    fn hash_password(&self, password: &str) -> Result<String, UserServiceError> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| UserServiceError::HashingError(e.to_string()))
    }

    pub fn verify_password(&self, password: &str, password_hash: &str) -> bool {
        if let Ok(parsed_hash) = PasswordHash::new(password_hash) {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .is_ok()
        } else {
            false
        }
    }
}

fn generate_two_factor_secret() -> String {
    let mut secret_bytes = [0u8; TWO_FACTOR_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut secret_bytes);
    BASE64.encode(secret_bytes)
}
