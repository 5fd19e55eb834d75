//! Pulse - engagement ranking and geospatial discovery engine
//!
//! Pulse is the ranking core of a nightlife discovery backend: it scores
//! plans and venues by time-decayed engagement, keeps those scores fresh,
//! and answers nearby/trending queries with blocked users excluded.
//!
//! ## Services
//!
//! - **Score calculator**: pure time-decayed weighted sum of joins and views
//! - **Score cache**: read-through TTL cache in front of the authoritative store
//! - **Score refresh**: on-demand recompute triggered by interactions, plus
//!   a scheduled full sweep over all active entities
//! - **Interaction recorder**: emit-and-forget view/join facts
//! - **Discovery**: nearby and trending queries with exclusion sets,
//!   distance annotation, and pagination
//! - **Stores**: MongoDB adapters with pushed-down geo predicates, and
//!   in-memory adapters for dev mode and tests

pub mod config;
pub mod discovery;
pub mod interaction;
pub mod model;
pub mod score;
pub mod store;
pub mod types;

pub use config::Args;
pub use types::{PulseError, Result};
