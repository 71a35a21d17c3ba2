pub mod cancellation;
pub mod chunk_key_encoding;
pub mod chunk_source;
pub mod codec;
pub mod coordinate_combiner;
pub mod coordinate_space;
pub mod coordinate_transform;
pub mod data_type;
mod error;
pub mod matrix;
pub mod metadata;
pub mod storage;

pub use error::{Error, Result};
