pub mod collaborators;
pub mod error;
pub mod keygen;
pub mod services;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::CoreError;
