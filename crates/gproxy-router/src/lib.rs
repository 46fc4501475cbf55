//! The axum HTTP frontend. Thin by design: all routing decisions and
//! translation logic live in `gproxy-core`; this crate only turns an
//! axum request into bytes+headers and a `ProxyResponse` back into bytes.

mod proxy;

pub use proxy::proxy_router;
