//! HTTP admission interceptor and server.

pub mod middleware;
mod server;

pub use middleware::{
    admission, client_identity, with_admission, SharedLimiter, HEADER_RATE_LIMIT,
    HEADER_RATE_LIMIT_REMAINING,
};
pub use server::HttpServer;
