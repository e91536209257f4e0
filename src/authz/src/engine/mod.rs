//! Grant engine
//!
//! Ties the grant store, the resolver and the per-principal cache together
//! behind one explicitly constructed [`AuthzEngine`].
//!
//! # Architecture
//!
//! ```text
//! allow/disallow/assign/retract ──► [write lock] ──► GrantStore ──► invalidate cache
//!                                                        ▲
//! can/is/list_abilities ──► AbilityCache ──(miss)──► resolve()
//! ```
//!
//! Mutations are serialized by one engine-wide lock and invalidate every
//! affected principal before the lock is released. Reads never take that lock.

pub mod cache;
pub mod mutation;

pub use cache::{AbilityCache, CacheConfig, CacheStats, CacheTicket};
pub use mutation::{AbilityRef, Allow, Assign, Disallow, HolderRef, Retract, RoleRef, SyncGrants};

use crate::error::{AuthzError, Result};
use crate::graph::Holder;
use crate::identity::{validate_name, Ability, AbilityKey, Role};
use crate::resolver::{resolve, ResolvedGrants, RoleMatch};
use crate::store::{GrantStore, InMemoryGrantStore};
use crate::types::{Authorizable, Principal, Target};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Memoize resolved grants per principal
    pub enable_cache: bool,

    /// Cache configuration
    pub cache_config: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_config: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from the environment
    ///
    /// - `AUTHZ_CACHE_ENABLED` - `true`/`false` (default: true)
    /// - `AUTHZ_CACHE_CAPACITY` - principals kept in the cache (default: 10000)
    /// - `AUTHZ_CACHE_TTL_SECS` - entry time-to-live, `0` for none (default: none)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("AUTHZ_CACHE_ENABLED") {
            config.enable_cache = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(AuthzError::Config(format!(
                        "AUTHZ_CACHE_ENABLED must be a boolean, got '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(value) = lookup("AUTHZ_CACHE_CAPACITY") {
            config.cache_config.capacity = value.trim().parse().map_err(|_| {
                AuthzError::Config(format!(
                    "AUTHZ_CACHE_CAPACITY must be a non-negative integer, got '{}'",
                    value
                ))
            })?;
        }

        if let Some(value) = lookup("AUTHZ_CACHE_TTL_SECS") {
            let secs: u64 = value.trim().parse().map_err(|_| {
                AuthzError::Config(format!(
                    "AUTHZ_CACHE_TTL_SECS must be a number of seconds, got '{}'",
                    value
                ))
            })?;
            config.cache_config.ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

/// Role and ability decision engine
///
/// Construct one per process (or per request context) and share it by
/// reference or `Arc`; there is no global registry.
pub struct AuthzEngine {
    config: EngineConfig,
    store: Arc<dyn GrantStore>,
    cache: Option<AbilityCache>,
    write_lock: Mutex<()>,
}

impl AuthzEngine {
    /// Create an engine over a fresh in-memory store with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine over a fresh in-memory store
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryGrantStore::new()))
    }

    /// Create an engine over a custom grant store
    pub fn with_store(config: EngineConfig, store: Arc<dyn GrantStore>) -> Self {
        let cache = config
            .enable_cache
            .then(|| AbilityCache::new(config.cache_config.clone()));

        info!(
            "AuthzEngine initialized with cache={}, capacity={}, ttl={:?}",
            config.enable_cache, config.cache_config.capacity, config.cache_config.ttl
        );

        Self {
            config,
            store,
            cache,
            write_lock: Mutex::new(()),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying grant store
    pub fn store(&self) -> &Arc<dyn GrantStore> {
        &self.store
    }

    // Mutation API

    /// Start granting an ability to a principal or role
    pub fn allow(&self, holder: impl Into<HolderRef>) -> Allow<'_> {
        Allow {
            engine: self,
            holder: holder.into(),
        }
    }

    /// Start revoking an ability from a principal or role
    pub fn disallow(&self, holder: impl Into<HolderRef>) -> Disallow<'_> {
        Disallow {
            engine: self,
            holder: holder.into(),
        }
    }

    /// Start assigning a role
    pub fn assign(&self, role: impl Into<RoleRef>) -> Assign<'_> {
        Assign {
            engine: self,
            role: role.into(),
        }
    }

    /// Start retracting a role
    pub fn retract(&self, role: impl Into<RoleRef>) -> Retract<'_> {
        Retract {
            engine: self,
            role: role.into(),
        }
    }

    /// Start replacing a principal's roles or direct abilities wholesale
    pub fn sync<P: Authorizable + ?Sized>(&self, principal: &P) -> SyncGrants<'_> {
        SyncGrants {
            engine: self,
            principal: principal.principal(),
        }
    }

    /// Create or update a role with a display title
    pub fn define_role(&self, name: &str, title: Option<&str>) -> Result<Role> {
        validate_name("role", name)?;

        self.locked(|store| {
            let role = store.find_or_create_role(name)?;
            let members = store.principals_with_role(role.id)?;
            let updated = store.set_role_title(role.id, title.map(str::to_string));
            self.invalidate_principals(&members);

            let updated = updated?;
            info!("Defined role '{}' ({:?})", updated.name, updated.title);
            Ok(updated)
        })
    }

    // Resolver API

    /// Whether `principal` holds the plain ability `ability`
    pub fn can<P: Authorizable + ?Sized>(&self, principal: &P, ability: &str) -> Result<bool> {
        self.can_on(principal, ability, Target::Unscoped)
    }

    /// Whether `principal` holds `ability` for `target`
    ///
    /// `false` means "no grant", not an explicit deny.
    pub fn can_on<P: Authorizable + ?Sized>(
        &self,
        principal: &P,
        ability: &str,
        target: impl Into<Target>,
    ) -> Result<bool> {
        let target = target.into();
        validate_name("ability", ability)?;
        target.validate()?;

        let principal = principal.principal();
        let allowed = self.grants_for(&principal)?.allows(ability, &target);

        debug!(
            "Authorization check: principal={}, ability={}, target={}, allowed={}",
            principal, ability, target, allowed
        );
        Ok(allowed)
    }

    /// Negation of [`can`](Self::can)
    pub fn cannot<P: Authorizable + ?Sized>(&self, principal: &P, ability: &str) -> Result<bool> {
        self.can(principal, ability).map(|allowed| !allowed)
    }

    /// Negation of [`can_on`](Self::can_on)
    pub fn cannot_on<P: Authorizable + ?Sized>(
        &self,
        principal: &P,
        ability: &str,
        target: impl Into<Target>,
    ) -> Result<bool> {
        self.can_on(principal, ability, target).map(|allowed| !allowed)
    }

    /// Test the principal's roles against `roles` according to `mode`
    pub fn is<P, S>(&self, principal: &P, roles: &[S], mode: RoleMatch) -> Result<bool>
    where
        P: Authorizable + ?Sized,
        S: AsRef<str>,
    {
        let principal = principal.principal();
        Ok(self.grants_for(&principal)?.matches_roles(roles, mode))
    }

    /// Effective abilities of `principal`, ordered by id
    pub fn list_abilities<P: Authorizable + ?Sized>(&self, principal: &P) -> Result<Vec<Ability>> {
        let principal = principal.principal();
        Ok(self.grants_for(&principal)?.abilities.clone())
    }

    /// Roles assigned to `principal`, ordered by id
    pub fn roles_of<P: Authorizable + ?Sized>(&self, principal: &P) -> Result<Vec<Role>> {
        let principal = principal.principal();
        Ok(self.grants_for(&principal)?.roles.clone())
    }

    // Introspection

    /// Every known role
    pub fn roles(&self) -> Result<Vec<Role>> {
        self.store.roles()
    }

    /// Every known ability
    pub fn abilities(&self) -> Result<Vec<Ability>> {
        self.store.abilities()
    }

    /// Look up an ability by exact identity without creating it
    pub fn find_ability(&self, name: &str, target: impl Into<Target>) -> Result<Option<Ability>> {
        let key = AbilityKey::new(name, target.into())?;
        self.store.find_ability(&key)
    }

    /// Principals currently assigned the role `name`
    pub fn principals_with_role(&self, name: &str) -> Result<Vec<Principal>> {
        validate_name("role", name)?;
        match self.store.find_role(name)? {
            Some(role) => self.store.principals_with_role(role.id),
            None => Ok(Vec::new()),
        }
    }

    // Cache control

    /// Drop every cached resolution
    pub fn refresh(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("Ability cache cleared");
        }
    }

    /// Drop the cached resolution of one principal
    pub fn refresh_for<P: Authorizable + ?Sized>(&self, principal: &P) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&principal.principal());
        }
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(AbilityCache::stats)
    }

    // Private helper methods

    fn grants_for(&self, principal: &Principal) -> Result<Arc<ResolvedGrants>> {
        principal.validate()?;

        let Some(cache) = &self.cache else {
            return Ok(Arc::new(resolve(self.store.as_ref(), principal)?));
        };

        let ticket = cache.ticket();
        if let Some(grants) = cache.get(principal) {
            debug!("Cache hit for {}", principal);
            return Ok(grants);
        }

        let grants = Arc::new(resolve(self.store.as_ref(), principal)?);
        if !cache.put(principal, ticket, Arc::clone(&grants)) {
            debug!("Skipped caching {}: invalidated during resolution", principal);
        }
        Ok(grants)
    }

    /// Run a mutation with the engine-wide write lock held
    pub(crate) fn locked<T>(&self, f: impl FnOnce(&dyn GrantStore) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        f(self.store.as_ref())
    }

    /// Change edges of `holder` and invalidate everyone it reaches
    ///
    /// Affected principals are collected before the change and invalidated
    /// whether or not the change succeeds.
    pub(crate) fn apply_edge(
        &self,
        store: &dyn GrantStore,
        holder: &Holder,
        change: impl FnOnce(&dyn GrantStore) -> Result<bool>,
    ) -> Result<bool> {
        let affected = match holder {
            Holder::Principal { principal } => vec![principal.clone()],
            Holder::Role { role_id } => store.principals_with_role(*role_id)?,
        };

        let outcome = change(store);
        self.invalidate_principals(&affected);

        if let Err(err) = &outcome {
            warn!("Grant store failed while changing {}: {}", holder, err);
        }
        outcome
    }

    fn invalidate_principals(&self, principals: &[Principal]) {
        if let Some(cache) = &self.cache {
            for principal in principals {
                cache.invalidate(principal);
            }
        }
    }
}

impl Default for AuthzEngine {
    fn default() -> Self {
        Self::new()
    }
}
