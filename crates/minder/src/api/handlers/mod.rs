//! API request handlers, organized by domain:
//! - `sessions`: session CRUD and lifecycle operations
//! - `events`: event replay and the SSE stream
//! - `external`: external agent REST and WebSocket endpoints
//! - `directories`: local directory validation
//! - `misc`: health check

pub mod directories;
pub mod events;
pub mod external;
pub mod misc;
pub mod sessions;

pub use directories::check_directory;
pub use events::{get_events, sse_events};
pub use misc::health;
pub use sessions::{
    create_session, delete_session, get_diff, get_session, get_usage, interrupt_session,
    list_sessions, rename_session, resolve_permission, send_input, set_approval_mode,
    start_session, stop_session,
};
