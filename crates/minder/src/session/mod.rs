//! Session data model and lifecycle helpers.

pub mod models;
pub mod state;

pub use models::{Message, Session};
pub use state::{maybe_set_session_name, now_ts, transition};
