//! In-memory sources for tests.

mod filesystem;
mod store;

pub use filesystem::MockFs;
pub use store::MockStore;
