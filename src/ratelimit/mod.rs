//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod distributed;
mod factory;
mod gate;
mod key;
mod limiter;
mod policy;
mod rules;

pub use backend::TierLimiter;
pub use bucket::TokenBucket;
pub use distributed::{ScopedDistributedLimiter, EXPIRY_BUFFER, WINDOW};
pub use factory::LimiterFactory;
pub use gate::{CompositeGate, Decision, Denial};
pub use key::{Protocol, RateLimitKey, Tier};
pub use limiter::ScopedLocalLimiter;
pub use policy::FailureMode;
pub use rules::TierConfig;
