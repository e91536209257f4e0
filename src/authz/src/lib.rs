//! # Gatehouse Authorization Engine
//!
//! In-process role and ability engine. Abilities are granted to principals
//! directly or through roles, optionally scoped to an entity type or a single
//! entity, and checks are answered from a per-principal cache that every
//! mutation invalidates synchronously.
//!
//! ## Features
//!
//! - **Auto-created roles and abilities**: referencing a name creates it once
//! - **Type and instance scopes**: a grant on `Post` covers every post; a grant
//!   on `Post#3` covers only that post
//! - **Purely additive**: there are no deny grants, only removal
//! - **Coherent caching**: no check ever sees a state older than the last
//!   completed mutation affecting its principal
//! - **Pluggable storage** through [`GrantStore`], with an in-memory backend
//!   that snapshots to JSON
//!
//! ## Example
//!
//! ```rust
//! use gatehouse_authz::{AuthzEngine, Principal, RoleMatch, Target};
//!
//! # fn main() -> gatehouse_authz::Result<()> {
//! let engine = AuthzEngine::new();
//! let user = Principal::user(1);
//!
//! engine.allow("admin").to("ban-users")?;
//! engine.assign("admin").to(&user)?;
//!
//! assert!(engine.can(&user, "ban-users")?);
//! assert!(engine.is(&user, &["admin"], RoleMatch::Any)?);
//!
//! engine.allow(&user).to_on("edit", Target::of_type("Post"))?;
//! assert!(engine.can_on(&user, "edit", Target::instance("Post", 42))?);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod graph;
pub mod identity;
pub mod resolver;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use engine::{
    AbilityRef, AuthzEngine, CacheConfig, CacheStats, EngineConfig, HolderRef, RoleRef,
};
pub use error::{AuthzError, Result};
pub use graph::{Assignment, Grant, Holder};
pub use identity::{Ability, AbilityKey, Role};
pub use resolver::{ResolvedGrants, RoleMatch};
pub use store::{GrantStore, InMemoryGrantStore, Snapshot};
pub use types::{AbilityId, Authorizable, Entity, Principal, RoleId, Target};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
