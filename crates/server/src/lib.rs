//! exgw-server: library interface for integration tests.

pub mod order_ids;
pub mod server;
