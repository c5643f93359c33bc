mod guard;
pub mod helpers;
mod idp;
mod middleware;
mod token;

pub use guard::Guard;
pub use idp::{DEFAULT_ACCESS_TOKEN_TTL_SECONDS, IdentityService, TokenResponse};
pub use middleware::{ApiKeyState, AuthError, RequireApiKey, RequireUser, api_key_from_query};
pub use token::{IssuedToken, ParsedToken, SecretHasher, parse_token};
