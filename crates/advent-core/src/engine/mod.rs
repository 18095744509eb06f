//! Unlock engine: authorization, delivery and request routing.

pub mod authorize;
pub mod clock;
pub mod delivery;
pub mod retry;
pub mod router;

pub use authorize::{Authorizer, Verdict};
pub use clock::{Clock, FixedClock, SystemClock};
pub use delivery::{DeliveryResult, Dispatcher};
pub use retry::RetryPolicy;
pub use router::{parse_day, Command, Outcome, Router};
