pub mod auth;
pub mod ingest;
pub mod search;
pub mod session;
pub mod status;
pub mod token;
