//! Forced revalidation and termination of already-issued sessions.
//!
//! An operator publishes a command (refresh or sign out) for a subject; the
//! [`middleware_layer::revocation`] gate applies it once per device on that
//! subject's next requests and records an acknowledgement so repeat requests
//! are no-ops. Signals live in a TTL cache mirrored to a durable store that
//! rebuilds the cache at startup.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod state;

pub mod models {
    pub mod action;
    pub mod session;
}

pub mod stores {
    pub mod ephemeral;
    pub mod memory;
    pub mod permanent;
    pub mod postgres;
    pub mod redis_cache;
}

pub mod services {
    pub mod hydration;
    pub mod revocation;
    pub mod session;
    pub mod sweep;
}

pub mod handlers {
    pub mod revocations;
    pub mod session;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod revocation;
}
