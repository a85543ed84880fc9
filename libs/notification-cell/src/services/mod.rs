pub mod delivery;
pub mod threshold;
pub mod watcher;

pub use delivery::*;
pub use threshold::*;
pub use watcher::*;
