//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueService` trait
//! for different queue backends.

pub mod aws;
pub mod memory;

pub use aws::{AwsError, AwsSqsProvider};
pub use memory::InMemoryProvider;
