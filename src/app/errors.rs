use crate::catalog::CatalogError;
use crate::semantic::{EncodingError, SearchUnavailable};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("meal {0} not found")]
    NotFound(u64),

    #[error("encoding failed, nothing was written: {0}")]
    Encoding(#[from] EncodingError),

    #[error("catalog write failed: {0}")]
    CatalogWrite(CatalogError),

    #[error("search unavailable: {0}")]
    SearchUnavailable(#[from] SearchUnavailable),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => AppError::NotFound(id),
            CatalogError::InvalidPrice(price) => {
                AppError::InvalidInput(format!("price must be a non-negative number, got {price}"))
            }
            err => AppError::CatalogWrite(err),
        }
    }
}
