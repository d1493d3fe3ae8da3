pub mod conversations;
pub mod database;
pub mod error;
pub mod frames;
pub mod generations;
pub mod rows;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
