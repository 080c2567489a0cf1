pub mod backend;
pub mod citations;
pub mod config;
pub mod paths;
pub mod session;

pub use backend::{
    BackendClient, BackendError, IngestResponse, IngestionProgress, IngestionStatus,
    LoginResponse, SearchResponse, UserId,
};
pub use citations::{annotate, annotate_plain, Annotated};
pub use config::CopilotConfig;
pub use paths::CopilotPaths;
pub use session::{Session, SessionStore};

pub use copilot_auth_bridge as auth;
