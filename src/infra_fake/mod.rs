mod backend_fake;
mod transport_fake;

pub use backend_fake::*;
pub use transport_fake::*;
