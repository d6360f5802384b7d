//! Event consumers: the [`Subscribe`] trait, the fan-out
//! [`SubscriberSet`], and the built-in [`LogWriter`].
//!
//! Subscribers observe the run without participating in it: each gets a
//! bounded queue and a dedicated worker, so a slow or panicking subscriber
//! cannot stall the scheduler or its sibling subscribers. Trouble in this
//! layer is itself observable — dropped deliveries and handler panics
//! surface to the remaining subscribers as diagnostic events.

mod log;
mod set;
mod subscriber;

pub use self::log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
