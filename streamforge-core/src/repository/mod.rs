//! Durable storage repositories
//!
//! Plain SQL over a SQLite pool. Repositories are cheap to clone and own
//! the pool; the session manager is the only writer of session rows.

pub mod content;
pub mod session;

pub use content::ContentRepository;
pub use session::SessionRepository;
