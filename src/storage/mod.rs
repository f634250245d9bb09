//! SQLite persistence shared by the model registry and the user repository.

pub mod database;
pub mod users;

pub use database::{Database, StorageError};
pub use users::{BanStatus, NewUser, User, UserRepository};
