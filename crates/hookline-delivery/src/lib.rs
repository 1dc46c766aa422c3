//! At-least-once webhook delivery for tenant events.
//!
//! A domain action reports "event E happened for tenant T with payload P".
//! The [`Dispatcher`] looks up T's subscribers for E, signs the payload once
//! per subscriber, POSTs it, retries transient failures with exponential
//! backoff, and reports one terminal result per subscriber to an observer.
//!
//! # Architecture
//!
//! 1. **Registry** - [`SubscriptionRegistry`] resolves targets, once per
//!    dispatch
//! 2. **Signer** - [`Signer`] builds the canonical body and its HMAC-SHA256
//!    signature, once per sequence so every retry is byte-identical
//! 3. **Client** - [`DeliveryClient`] makes one bounded POST and classifies
//!    the answer into an [`AttemptOutcome`]
//! 4. **Policy** - [`RetryPolicy`] decides, without I/O, whether and when to
//!    try again
//!
//! Each subscriber gets its own task, so a hanging endpoint never delays a
//! healthy one. Only an unreachable registry fails a dispatch; everything
//! else ends up in the per-subscriber [`DeliveryResult`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookline_core::{TenantId, TracingObserver};
//! use hookline_delivery::{DispatchConfig, Dispatcher, InMemorySubscriptionRegistry};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), hookline_delivery::DispatchError> {
//! let registry = Arc::new(InMemorySubscriptionRegistry::new());
//! let dispatcher =
//!     Dispatcher::new(registry, Arc::new(TracingObserver), DispatchConfig::default())?;
//!
//! let results = dispatcher
//!     .dispatch(TenantId::new(), "application.created", &json!({"id": "a1"}))
//!     .await?;
//! for result in results {
//!     println!("{}: delivered={}", result.subscriber_id, result.delivered);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`DeliveryResult`]: hookline_core::DeliveryResult

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod retry;
pub mod signing;

pub use client::{AttemptOutcome, ClientConfig, DeliveryClient, DeliveryRequest};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::{DeliveryError, DispatchError, ErrorCategory, Result};
pub use registry::{InMemorySubscriptionRegistry, SubscriptionRegistry};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy, StopReason};
pub use signing::{verify_signature, SignedPayload, Signer, SigningError};
