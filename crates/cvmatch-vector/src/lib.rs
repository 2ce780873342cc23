//! Vector store variants: an exact in-memory scan and a LanceDB-backed
//! approximate store.

pub mod exact;
pub mod index_build;
pub mod lance;
pub mod schema;
pub mod table;

pub use exact::ExactStore;
pub use lance::LanceStore;
