mod http;
mod query;
mod session;
mod task;

pub use http::*;
pub use query::*;
pub use session::*;
pub use task::*;
