use std::sync::Arc;
use userstore::{
    models::QueryFilter,
    repositories::user_repository::SqliteUserRepository,
    services::user_service::{
        CreateUserRequest, UpdatePasswordRequest, UserService, UserServiceError,
    },
    test_utils::test_helpers,
};

async fn service() -> UserService {
    let pool = test_helpers::create_test_db().await.unwrap();
    let repository = Arc::new(SqliteUserRepository::new(pool));
    UserService::new(repository)
}

fn create_request(username: &str, password: &str) -> CreateUserRequest {
    CreateUserRequest {
        username: username.to_string(),
        password: password.to_string(),
        password_confirm: Some(password.to_string()),
    }
}

#[tokio::test]
async fn test_create_user_success() {
    let service = service().await;

    let result = service
        .create_user(create_request("frosty", "password123"))
        .await;
    assert!(result.is_ok());

    let user = result.unwrap();
    assert_eq!(user.username, "frosty");
    assert!(!user.is_admin);
    assert!(user.created_on > 0);
    assert!(user.hashed_password.starts_with("$argon2"));
    assert!(!user.two_factor_secret.is_empty());
}

#[tokio::test]
async fn test_create_user_duplicate_username() {
    let service = service().await;

    let result1 = service
        .create_user(create_request("duplicate", "password123"))
        .await;
    assert!(result1.is_ok());

    let result2 = service
        .create_user(create_request("duplicate", "password456"))
        .await;
    assert!(matches!(
        result2.unwrap_err(),
        UserServiceError::UsernameTaken
    ));
}

#[tokio::test]
async fn test_two_factor_secrets_are_unique() {
    let service = service().await;

    let first = service
        .create_user(create_request("one", "password123"))
        .await
        .unwrap();
    let second = service
        .create_user(create_request("two", "password123"))
        .await
        .unwrap();

    assert_ne!(first.two_factor_secret, second.two_factor_secret);
}

#[tokio::test]
async fn test_authenticate_success() {
    let service = service().await;

    service
        .create_user(create_request("auth", "password123"))
        .await
        .unwrap();

    let user = service.authenticate("auth", "password123").await.unwrap();
    assert_eq!(user.username, "auth");
}

#[tokio::test]
async fn test_authenticate_wrong_password() {
    let service = service().await;

    service
        .create_user(create_request("wrongpw", "password123"))
        .await
        .unwrap();

    let result = service.authenticate("wrongpw", "wrongpassword").await;
    assert!(matches!(
        result.unwrap_err(),
        UserServiceError::InvalidCredentials
    ));
}

#[tokio::test]
async fn test_archived_user_cannot_authenticate() {
    let service = service().await;

    let user = service
        .create_user(create_request("leaving", "password123"))
        .await
        .unwrap();
    service.archive_user(user.id).await.unwrap();

    let result = service.authenticate("leaving", "password123").await;
    assert!(matches!(
        result.unwrap_err(),
        UserServiceError::InvalidCredentials
    ));

    // Still reachable by id
    let archived = service.get_user(user.id).await.unwrap();
    assert!(archived.is_archived());
}

#[tokio::test]
async fn test_update_password() {
    let service = service().await;

    let user = service
        .create_user(create_request("changer", "oldpassword123"))
        .await
        .unwrap();

    let request = UpdatePasswordRequest {
        user_id: user.id,
        new_password: "newpassword456".to_string(),
        new_password_confirm: Some("newpassword456".to_string()),
    };
    service.update_password(request).await.unwrap();

    assert!(service.authenticate("changer", "oldpassword123").await.is_err());
    assert!(service.authenticate("changer", "newpassword456").await.is_ok());

    let updated = service.get_user(user.id).await.unwrap();
    assert!(updated.password_last_changed_on.is_some());
}

#[tokio::test]
async fn test_update_password_for_missing_user() {
    let service = service().await;

    let request = UpdatePasswordRequest {
        user_id: 404,
        new_password: "newpassword456".to_string(),
        new_password_confirm: None,
    };

    let result = service.update_password(request).await;
    assert!(matches!(result.unwrap_err(), UserServiceError::UserNotFound));
}

#[tokio::test]
async fn test_rename_user_to_taken_name() {
    let service = service().await;

    service
        .create_user(create_request("first", "password123"))
        .await
        .unwrap();
    let second = service
        .create_user(create_request("second", "password123"))
        .await
        .unwrap();

    let result = service.rename_user(second.id, "first").await;
    assert!(matches!(result.unwrap_err(), UserServiceError::UsernameTaken));

    let renamed = service.rename_user(second.id, "third").await.unwrap();
    assert_eq!(renamed.username, "third");
    assert_eq!(renamed.created_on, second.created_on);
    assert_eq!(
        service.get_user_by_username("third").await.unwrap().id,
        second.id
    );
}

#[tokio::test]
async fn test_list_and_count_users() {
    let service = service().await;

    for name in ["amy", "ben", "cat"] {
        service
            .create_user(create_request(name, "password123"))
            .await
            .unwrap();
    }
    let ben = service.get_user_by_username("ben").await.unwrap();
    service.archive_user(ben.id).await.unwrap();

    let filter = QueryFilter::default();
    let list = service.list_users(&filter).await.unwrap();
    let count = service.count_users(&filter).await.unwrap();

    assert_eq!(count, 2);
    assert_eq!(list.pagination.total_count, count);
    assert!(list.users.iter().all(|u| u.username != "ben"));
}

#[tokio::test]
async fn test_two_factor_rotation_and_confirmation() {
    let service = service().await;

    let user = service
        .create_user(create_request("twofer", "password123"))
        .await
        .unwrap();
    assert!(!user.has_verified_two_factor_secret());

    let confirmed = service.confirm_two_factor_secret(user.id).await.unwrap();
    assert!(confirmed.has_verified_two_factor_secret());

    // Nothing left to confirm
    let result = service.confirm_two_factor_secret(user.id).await;
    assert!(matches!(
        result.unwrap_err(),
        UserServiceError::NoPendingTwoFactorSecret
    ));

    let secret = service.rotate_two_factor_secret(user.id).await.unwrap();
    let rotated = service.get_user(user.id).await.unwrap();
    assert_eq!(rotated.two_factor_secret, secret);
    assert_ne!(rotated.two_factor_secret, user.two_factor_secret);
    assert!(!rotated.has_verified_two_factor_secret());

    service.archive_user(user.id).await.unwrap();
    let result = service.rotate_two_factor_secret(user.id).await;
    assert!(matches!(result.unwrap_err(), UserServiceError::UserNotFound));
}

#[tokio::test]
async fn test_search_users_by_prefix() {
    let service = service().await;

    for name in ["mira", "miro", "nora"] {
        service
            .create_user(create_request(name, "password123"))
            .await
            .unwrap();
    }

    let found = service.search_users("mir").await.unwrap();
    assert_eq!(
        found.iter().map(|u| u.username.as_str()).collect::<Vec<_>>(),
        vec!["mira", "miro"]
    );
}
