pub mod user_service;

pub use user_service::{CreateUserRequest, UpdatePasswordRequest, UserService, UserServiceError};
