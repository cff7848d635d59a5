//! Notification refreshes gated on message sync catch-up
//!
//! This crate provides:
//! - The [`Notifier`] capability set a messaging client renders through
//! - [`OptimizedNotifier`], a drop-in decorator that runs refreshes
//!   immediately once sync has caught up and coalesces them otherwise

pub mod notifier;
pub mod optimized;

// Re-exports
pub use notifier::{Notifier, ThreadId, UpdateRequest};
pub use optimized::OptimizedNotifier;
