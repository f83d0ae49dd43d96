pub mod rate_limit;
pub mod session;

pub use rate_limit::{RateLimitState, RateLimiter};
pub use session::{ChatSession, FailureKind, SessionDeps, SessionError, SessionState, SubmitOutcome};
