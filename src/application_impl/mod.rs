mod auth_service_impl;
mod invalidation_hub;
mod optimistic_guard;
mod query_cache;
mod request_pipeline;
mod session_coordinator;
mod task_board_service_impl;

pub use auth_service_impl::*;
pub use invalidation_hub::*;
pub use optimistic_guard::*;
pub use query_cache::*;
pub use request_pipeline::*;
pub use session_coordinator::*;
pub use task_board_service_impl::*;
