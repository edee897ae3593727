//! Authorization: rules, the per-user rule store, the request gate and the audit trail.

pub mod audit;
pub mod cache;
pub mod gate;
pub mod rules;
pub mod store;

pub use audit::{record_audit, AuditRecord, AuditSink, CatalogAuditSink};
pub use cache::{BoundedCache, CacheStats};
pub use gate::{authenticate, authorize, AuditContext, Gate, HeaderSessionResolver, RouteOptions, Session, SessionResolver};
pub use rules::{can, system_overrides, OneOrMany, Role, Rule, RuleSet, ALL, MANAGE};
pub use store::{grant_role, Account, CatalogDirectory, RuleStore, UserDirectory};
