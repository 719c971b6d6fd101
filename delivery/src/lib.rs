//! Acknowledgment-gated delivery of push-style record streams.
//!
//! A [`subscriber::Subscriber`] turns a [`subscriber::Producer`] that pushes messages from one
//! or more concurrent lanes into a pull-style [`stream::MessageStream`]. Every message must be
//! acknowledged by a consumer before the calling lane moves on, rejected messages are
//! redelivered until accepted, and shutting the subscriber down waits for every subscription
//! to wind down through the [`concurrency::closer::Closer`].

pub mod codec;
pub mod concurrency;
pub mod error;
mod macros;
pub mod memory;
pub mod message;
pub mod observer;
pub mod processor;
pub mod publisher;
pub mod store;
pub mod stream;
pub mod subscriber;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
