pub mod account_service;
pub mod admin_service;
pub mod issuance_service;
pub mod sweeper;
