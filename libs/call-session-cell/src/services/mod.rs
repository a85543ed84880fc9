pub mod media;
pub mod orchestrator;
pub mod signaling;

pub use media::*;
pub use orchestrator::*;
pub use signaling::*;
