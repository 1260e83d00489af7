//! Vector index and its on-disk form.

pub mod flat;
mod npy;
pub mod store;

pub use flat::{l2_squared, FlatL2Index, IndexError};
pub use store::{IndexArtifacts, IndexMeta, IndexStore, StoreError};
