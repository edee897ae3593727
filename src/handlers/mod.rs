//! HTTP handlers for generated resources and the self-service routes.

pub mod account;
pub mod resource;
pub use account::*;
pub use resource::*;
