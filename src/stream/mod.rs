//! Stream adapters over gateway notifications.

pub mod updates;

pub use updates::StateUpdates;
