// store

mod credential_store;

pub use credential_store::*;

// network

mod transport;

pub use transport::*;

// session

mod invalidation_sink;

pub use invalidation_sink::*;

// cache

mod query_fetcher;

pub use query_fetcher::*;
