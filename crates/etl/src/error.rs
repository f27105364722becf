use core_types::CoreError;
use database::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Invalid period range: {0}")]
    InvalidPeriodRange(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("The external source was unreachable for the entire run; no unit of work succeeded")]
    SourceUnavailable,
}
