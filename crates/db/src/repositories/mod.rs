use thiserror::Error;

use reserva_core::store::StoreError;

pub mod memory;
pub mod reservation;

pub use memory::InMemoryReservationStore;
pub use reservation::SqlReservationStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => StoreError::Database(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}
