//! Distributes upstream annotation tasks among developers.

pub mod allocator;
pub mod api;
pub mod config;
pub mod error;
pub mod labeling;
pub mod locks;
pub mod model;
pub mod pool;
pub mod pusher;
pub mod recorder;
pub mod retry;
pub mod store;
