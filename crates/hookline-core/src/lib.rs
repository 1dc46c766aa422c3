//! Core domain models, observability sink and clock abstractions.
//!
//! Provides strongly-typed identifiers, subscriber and occurrence types, the
//! terminal delivery result reported to observers, and the clock used for
//! timestamps and backoff sleeps. The delivery crate depends on these
//! foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    DeliveryObserver, DeliveryResult, MulticastObserver, NoOpObserver, TracingObserver,
};
pub use models::{
    DeliveryState, EventKind, EventOccurrence, Subscriber, SubscriberId, TenantId,
};
pub use time::{Clock, RealClock, TestClock};
