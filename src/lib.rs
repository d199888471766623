pub mod config;
pub mod db;
pub mod models;
pub mod queries;
pub mod repositories;
pub mod services;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;
