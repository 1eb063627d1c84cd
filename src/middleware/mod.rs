pub mod caller;
pub mod cors;
pub mod rate_limit;
pub mod validation;

pub use caller::{Caller, CALLER_HEADER};
pub use cors::create_cors_layer;
pub use rate_limit::{limit_writes, WriteRateLimiter};
pub use validation::ValidatedJson;
