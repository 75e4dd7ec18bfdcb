pub mod handlers;
pub mod stream;

pub use handlers::{create_router, ApiState};
