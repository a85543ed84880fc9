pub mod http;
pub mod memory;
pub mod store;

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use store::{ChangeEvent, ChangeFeed, ChangeOp, SharedStore};
