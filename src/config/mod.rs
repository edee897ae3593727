pub mod builtin;
pub mod types;
pub mod loader;
pub mod validator;
pub mod resolved;

pub use builtin::{builtin_entities, GROUP_RESOURCE, LOG_RESOURCE, ROLE_TIERS, USER_RESOURCE};
pub use types::*;
pub use loader::*;
pub use validator::*;
pub use resolved::*;
