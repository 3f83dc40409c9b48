//! Append-only session/turn store for the inference gateway (spec §4.E).

pub mod store;

pub use store::{Session, SessionStatus, SessionStore, Turn};
