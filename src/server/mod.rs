mod api;
pub mod dto;
pub mod response;
mod router;
pub mod validation;

pub use router::{AppState, DEFAULT_MULTIPART_LIMIT_BYTES, create_router, log_request};
