mod key_repo;
mod server_repo;
mod tariff_repo;
mod user_repo;

pub use key_repo::KeyRepository;
pub use server_repo::ServerRepository;
pub use tariff_repo::TariffRepository;
pub use user_repo::UserRepository;

#[cfg(test)]
mod tests;
