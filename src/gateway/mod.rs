//! Gateway server implementation

pub mod auth;
mod rest;
mod router;
mod rpc;
mod server;

pub use auth::{ApiKeyAuth, AuthenticatedUser, auth_middleware, hash_api_key};
pub use router::{AppState, MCP_PATH, create_router};
pub use server::{Collaborators, Gateway};
