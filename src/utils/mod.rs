pub mod backoff;
pub mod precision;
pub mod rate_limit;
