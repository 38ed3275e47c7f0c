pub mod compactor;
pub mod config;
pub mod consistency;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
pub mod wal;
