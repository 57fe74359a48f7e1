pub use controller::{CapacityMode, ControllerTuning, ThrottleController};
pub use limiter::RateLimiter;
pub use retry::RetryPolicy;

mod controller;
mod limiter;
mod retry;
