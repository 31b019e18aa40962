//! Resilience primitives.
//!
//! # Data Flow
//! ```text
//! Guarded call:
//!     -> breaker.rs  (fail fast while the key is open)
//!     -> deadline.rs (stop waiting once the deadline fires)
//!     -> breaker.rs  (clear on success, count on failure)
//! Bursts of requests:
//!     -> debounce.rs (one execution per quiet period, bounded by max wait)
//! ```

mod breaker;
mod deadline;
mod debounce;

pub use breaker::{BreakerPolicy, BreakerStatus, CircuitBreakerRegistry, CircuitState};
pub use deadline::{with_deadline, Deadline};
pub use debounce::{debounce_bounded, Debounced};
