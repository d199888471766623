pub mod filter;
pub mod user;

pub use filter::QueryFilter;
pub use user::{Pagination, User, UserCreationInput, UserList};
