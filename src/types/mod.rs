mod models;
mod permission;
mod snapshot;

pub use models::*;
pub use permission::*;
pub use snapshot::*;
