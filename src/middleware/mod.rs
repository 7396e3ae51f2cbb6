//! Cross-cutting request layers: rate limiting and security headers.

pub mod rate_limit;
pub mod security_headers;
