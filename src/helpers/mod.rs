pub mod client_ip;
pub mod csrf;
pub mod rate_limit;

pub use client_ip::client_ip;
pub use rate_limit::RateLimiter;
