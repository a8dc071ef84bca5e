pub mod model;
pub mod provider;

pub use model::*;
pub use provider::{parse_chunk, OpenAIProvider};
