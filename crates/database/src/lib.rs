pub mod connection;
pub mod error;
pub mod repository;

// Re-export the key components to provide a clean public API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::{
    CapabilityRow, CommodityCard, CommodityDetail, CommodityFilter, DbRepository, NewCapability,
    PartnerTotal, SeriesPoint,
};
