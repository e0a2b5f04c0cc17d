//! Rate limiting, fraud detection, reputation tracking, and alerting for the
//! conduit connector's admission-control path.

mod alert;
mod fraud_detector;
mod reputation;
mod rate_limiter;
mod token_bucket;
mod violation_counter;

pub mod fraud;

pub use alert::{AlertChannel, AlertNotifier, AlertSeverity, NullAlertNotifier};
pub use fraud_detector::{FraudDetector, FraudVerdict, PauseRecord};
pub use rate_limiter::{PeerBucketOverride, RateLimiter, RateLimiterConfig};
pub use reputation::{ReputationScore, ReputationTracker};
pub use token_bucket::TokenBucket;
pub use violation_counter::ViolationCounter;
