pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::*;
pub use handlers::NotificationState;
pub use models::*;
pub use router::create_notification_router;
pub use services::*;
