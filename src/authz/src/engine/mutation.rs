//! Fluent mutation API
//!
//! ```
//! use gatehouse_authz::{AuthzEngine, Principal, Target};
//!
//! # fn main() -> gatehouse_authz::Result<()> {
//! let engine = AuthzEngine::new();
//! let user = Principal::user(1);
//!
//! engine.allow("admin").to("ban-users")?;
//! engine.assign("admin").to(&user)?;
//! engine.allow(&user).to_on("edit", Target::of_type("Post"))?;
//!
//! assert!(engine.can(&user, "ban-users")?);
//! assert!(engine.can_on(&user, "edit", Target::instance("Post", 5))?);
//!
//! engine.retract("admin").from(&user)?;
//! assert!(!engine.can(&user, "ban-users")?);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::fmt;

use tracing::info;

use super::AuthzEngine;
use crate::error::Result;
use crate::graph::Holder;
use crate::identity::{validate_name, Ability, AbilityKey, Role};
use crate::store::GrantStore;
use crate::types::{Authorizable, Principal, Target};

/// A role given by name or as an already resolved entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRef {
    Name(String),
    Role(Role),
}

impl RoleRef {
    /// Role name this reference resolves by
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Role(role) => &role.name,
        }
    }
}

impl From<&str> for RoleRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for RoleRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&Role> for RoleRef {
    fn from(role: &Role) -> Self {
        Self::Role(role.clone())
    }
}

impl From<Role> for RoleRef {
    fn from(role: Role) -> Self {
        Self::Role(role)
    }
}

/// An ability given by name (unscoped) or as an already resolved entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbilityRef {
    Name(String),
    Ability(Ability),
}

impl AbilityRef {
    fn key(&self) -> Result<AbilityKey> {
        match self {
            Self::Name(name) => AbilityKey::unscoped(name.clone()),
            Self::Ability(ability) => AbilityKey::new(ability.name.clone(), ability.target.clone()),
        }
    }
}

impl From<&str> for AbilityRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for AbilityRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&Ability> for AbilityRef {
    fn from(ability: &Ability) -> Self {
        Self::Ability(ability.clone())
    }
}

impl From<Ability> for AbilityRef {
    fn from(ability: Ability) -> Self {
        Self::Ability(ability)
    }
}

/// Whoever receives or loses a grant: a principal or a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderRef {
    Principal(Principal),
    Role(RoleRef),
}

impl HolderRef {
    /// Resolve to a graph holder, creating a named role if needed
    fn upsert(&self, store: &dyn GrantStore) -> Result<Holder> {
        match self {
            Self::Principal(principal) => {
                principal.validate()?;
                Ok(Holder::principal(principal.clone()))
            }
            Self::Role(role) => Ok(Holder::role(store.find_or_create_role(role.name())?.id)),
        }
    }

    /// Resolve to a graph holder without creating anything
    fn existing(&self, store: &dyn GrantStore) -> Result<Option<Holder>> {
        match self {
            Self::Principal(principal) => {
                principal.validate()?;
                Ok(Some(Holder::principal(principal.clone())))
            }
            Self::Role(role) => Ok(store
                .find_role(role.name())?
                .map(|role| Holder::role(role.id))),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Principal(principal) => principal.validate(),
            Self::Role(role) => validate_name("role", role.name()),
        }
    }
}

impl<P: Authorizable> From<&P> for HolderRef {
    fn from(principal: &P) -> Self {
        Self::Principal(principal.principal())
    }
}

impl From<Principal> for HolderRef {
    fn from(principal: Principal) -> Self {
        Self::Principal(principal)
    }
}

impl From<&str> for HolderRef {
    fn from(role: &str) -> Self {
        Self::Role(role.into())
    }
}

impl From<String> for HolderRef {
    fn from(role: String) -> Self {
        Self::Role(role.into())
    }
}

impl From<&Role> for HolderRef {
    fn from(role: &Role) -> Self {
        Self::Role(role.into())
    }
}

impl From<Role> for HolderRef {
    fn from(role: Role) -> Self {
        Self::Role(role.into())
    }
}

impl From<RoleRef> for HolderRef {
    fn from(role: RoleRef) -> Self {
        Self::Role(role)
    }
}

impl fmt::Display for HolderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(principal) => write!(f, "{}", principal),
            Self::Role(role) => write!(f, "role '{}'", role.name()),
        }
    }
}

/// Pending `allow(holder)`; finish with `to`, `to_on` or `to_all`
#[must_use = "nothing is granted until `to`, `to_on` or `to_all` is called"]
pub struct Allow<'a> {
    pub(super) engine: &'a AuthzEngine,
    pub(super) holder: HolderRef,
}

impl Allow<'_> {
    /// Grant a plain ability, or an already resolved one
    pub fn to(self, ability: impl Into<AbilityRef>) -> Result<Ability> {
        let key = ability.into().key()?;
        self.grant(key)
    }

    /// Grant `name` scoped to a type or instance
    pub fn to_on(self, name: &str, target: impl Into<Target>) -> Result<Ability> {
        let key = AbilityKey::new(name, target.into())?;
        self.grant(key)
    }

    /// Grant several plain abilities
    pub fn to_all<I, S>(self, names: I) -> Result<Vec<Ability>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = names
            .into_iter()
            .map(|name| AbilityKey::unscoped(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        keys.into_iter().map(|key| self.grant(key)).collect()
    }

    fn grant(&self, key: AbilityKey) -> Result<Ability> {
        self.holder.validate()?;

        self.engine.locked(|store| {
            let holder = self.holder.upsert(store)?;
            let ability = store.find_or_create_ability(&key)?;

            if self.engine.apply_edge(store, &holder, |store| store.grant(&holder, ability.id))? {
                info!("Allowed {} to {}", self.holder, ability);
            }
            Ok(ability)
        })
    }
}

/// Pending `disallow(holder)`; finish with `to` or `to_on`
#[must_use = "nothing is revoked until `to` or `to_on` is called"]
pub struct Disallow<'a> {
    pub(super) engine: &'a AuthzEngine,
    pub(super) holder: HolderRef,
}

impl Disallow<'_> {
    /// Revoke a plain ability, or an already resolved one
    ///
    /// Returns whether a grant was removed.
    pub fn to(self, ability: impl Into<AbilityRef>) -> Result<bool> {
        let key = ability.into().key()?;
        self.revoke(key)
    }

    /// Revoke `name` with exactly this scope
    pub fn to_on(self, name: &str, target: impl Into<Target>) -> Result<bool> {
        let key = AbilityKey::new(name, target.into())?;
        self.revoke(key)
    }

    fn revoke(&self, key: AbilityKey) -> Result<bool> {
        self.holder.validate()?;

        self.engine.locked(|store| {
            let Some(holder) = self.holder.existing(store)? else {
                return Ok(false);
            };
            let Some(ability) = store.find_ability(&key)? else {
                return Ok(false);
            };

            let removed =
                self.engine
                    .apply_edge(store, &holder, |store| store.revoke(&holder, ability.id))?;
            if removed {
                info!("Disallowed {} to {}", self.holder, ability);
            }
            Ok(removed)
        })
    }
}

/// Pending `assign(role)`; finish with `to`
#[must_use = "nothing is assigned until `to` is called"]
pub struct Assign<'a> {
    pub(super) engine: &'a AuthzEngine,
    pub(super) role: RoleRef,
}

impl Assign<'_> {
    /// Assign the role to `principal`
    pub fn to<P: Authorizable + ?Sized>(self, principal: &P) -> Result<Role> {
        let principal = principal.principal();
        principal.validate()?;
        validate_name("role", self.role.name())?;

        self.engine.locked(|store| {
            let role = store.find_or_create_role(self.role.name())?;
            let holder = Holder::principal(principal.clone());

            if self.engine.apply_edge(store, &holder, |store| store.assign(&principal, role.id))? {
                info!("Assigned role '{}' to {}", role.name, principal);
            }
            Ok(role)
        })
    }
}

/// Pending `retract(role)`; finish with `from`
#[must_use = "nothing is retracted until `from` is called"]
pub struct Retract<'a> {
    pub(super) engine: &'a AuthzEngine,
    pub(super) role: RoleRef,
}

impl Retract<'_> {
    /// Remove the role from `principal`; the role itself survives
    ///
    /// Returns whether an assignment was removed.
    pub fn from<P: Authorizable + ?Sized>(self, principal: &P) -> Result<bool> {
        let principal = principal.principal();
        principal.validate()?;
        validate_name("role", self.role.name())?;

        self.engine.locked(|store| {
            let Some(role) = store.find_role(self.role.name())? else {
                return Ok(false);
            };
            let holder = Holder::principal(principal.clone());

            let removed = self
                .engine
                .apply_edge(store, &holder, |store| store.unassign(&principal, role.id))?;
            if removed {
                info!("Retracted role '{}' from {}", role.name, principal);
            }
            Ok(removed)
        })
    }
}

/// Pending `sync(principal)`; finish with `roles` or `abilities`
///
/// A sync is a sequence of store writes, not one atomic write. If the store
/// fails partway, the writes already made are kept and the error is returned;
/// the principal's cache entry is dropped either way, so later checks see
/// exactly what the store holds. Repeating the same sync completes it.
#[must_use = "nothing is synced until `roles` or `abilities` is called"]
pub struct SyncGrants<'a> {
    pub(super) engine: &'a AuthzEngine,
    pub(super) principal: Principal,
}

impl SyncGrants<'_> {
    /// Make the principal's role assignments exactly `names`
    ///
    /// Not atomic across store calls; see [`SyncGrants`].
    pub fn roles<I, S>(self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.principal.validate()?;
        let names: BTreeSet<String> = names
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .collect();
        for name in &names {
            validate_name("role", name)?;
        }

        let principal = &self.principal;
        let holder = Holder::principal(principal.clone());

        self.engine.locked(|store| {
            self.engine.apply_edge(store, &holder, |store| {
                let mut changed = false;

                for current in store.roles_of(principal)? {
                    if !names.contains(&current.name) {
                        changed |= store.unassign(principal, current.id)?;
                    }
                }
                for name in &names {
                    let role = store.find_or_create_role(name)?;
                    changed |= store.assign(principal, role.id)?;
                }
                Ok(changed)
            })?;

            info!("Synced roles of {} to {:?}", principal, names);
            Ok(())
        })
    }

    /// Make the principal's direct unscoped abilities exactly `names`
    ///
    /// Scoped direct grants and role-inherited abilities are not touched.
    /// Not atomic across store calls; see [`SyncGrants`].
    pub fn abilities<I, S>(self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.principal.validate()?;
        let keys = names
            .into_iter()
            .map(|name| AbilityKey::unscoped(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let principal = &self.principal;
        let holder = Holder::principal(principal.clone());

        self.engine.locked(|store| {
            self.engine.apply_edge(store, &holder, |store| {
                let mut changed = false;

                for current in store.direct_abilities_of(&holder)? {
                    if current.target == Target::Unscoped && !keys.contains(&current.key()) {
                        changed |= store.revoke(&holder, current.id)?;
                    }
                }
                for key in &keys {
                    let ability = store.find_or_create_ability(key)?;
                    changed |= store.grant(&holder, ability.id)?;
                }
                Ok(changed)
            })?;

            info!("Synced direct abilities of {}", principal);
            Ok(())
        })
    }
}
