pub mod builder;
pub mod users;

pub use builder::{BindValue, QueryBuildError, SortOrder, Statement};
