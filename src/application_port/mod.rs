mod api_client;
mod auth_service;
mod session_error;
mod task_board_service;

pub use api_client::*;
pub use auth_service::*;
pub use session_error::*;
pub use task_board_service::*;
