//! Loopback HTTP/CONNECT proxy enforcing a domain allowlist (C8).

pub mod proxy;

pub use proxy::{extract_host, NetworkFilter};
