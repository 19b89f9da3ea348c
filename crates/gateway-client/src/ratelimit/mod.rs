//! Outbound rate limiting

mod bucket;

pub use bucket::{Permit, RateLimitBucket};
