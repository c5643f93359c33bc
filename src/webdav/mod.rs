//! WebDAV gateway: maps DAV verbs onto file-by-path operations, holding
//! per-user tokens obtained with Basic credentials.

mod backend;
mod handlers;
mod identity;
mod router;
mod tokens;
mod xml;

pub use backend::{DavBackend, HttpDavBackend, LocalDavBackend};
pub use handlers::{ALLOWED_METHODS, decode_path, is_lock_file};
pub use identity::{HttpIdentityProvider, IdentityProvider, LocalIdentityProvider};
pub use router::{WebDavState, create_webdav_router};
pub use tokens::{REFRESH_INTERVAL, TokenKeeper};
