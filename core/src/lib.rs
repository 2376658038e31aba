pub mod config;
pub mod contract;
pub mod error;
pub mod feedback;
pub mod query;
pub mod resolver;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod worker;


// Re-exports for convenience
pub use config::OverseerConfig;
pub use error::{OverseerError, Result};
pub use session::{Session, SessionId, SessionState};
pub use store::SessionStore;
pub use supervisor::Supervisor;
