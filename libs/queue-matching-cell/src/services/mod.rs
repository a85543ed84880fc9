pub mod booking;
pub mod counter;
pub mod virtual_queue;

pub use booking::*;
pub use counter::*;
pub use virtual_queue::*;
