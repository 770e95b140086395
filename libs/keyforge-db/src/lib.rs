pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
mod retry;

pub use sqlx;

pub use db::{MIGRATOR, connect, connect_memory};
pub use error::StoreError;
