//! Resolution of a principal's effective roles and abilities
//!
//! The effective ability set is the principal's direct grants plus the grants
//! of every role it holds, deduplicated by ability identity. Only positive
//! grants exist, so a check is allowed iff any ability in the set matches.

use crate::error::Result;
use crate::identity::{Ability, Role};
use crate::store::GrantStore;
use crate::types::{AbilityId, Principal, Target};
use std::collections::BTreeMap;
use tracing::debug;

/// How a list of role names is tested against a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleMatch {
    /// At least one of the roles
    #[default]
    Any,
    /// Every one of the roles
    All,
    /// None of the roles
    None,
}

/// Effective roles and abilities of one principal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGrants {
    /// Assigned roles, ordered by id
    pub roles: Vec<Role>,
    /// Direct and role-inherited abilities, ordered by id, no duplicates
    pub abilities: Vec<Ability>,
}

impl ResolvedGrants {
    /// Assemble from assigned roles and every ability reaching the principal
    ///
    /// Abilities may repeat; the result keeps one of each, ordered by id.
    pub fn from_parts(roles: Vec<Role>, abilities: impl IntoIterator<Item = Ability>) -> Self {
        let abilities: BTreeMap<AbilityId, Ability> = abilities
            .into_iter()
            .map(|ability| (ability.id, ability))
            .collect();

        Self {
            roles,
            abilities: abilities.into_values().collect(),
        }
    }

    /// Whether any held ability satisfies `name` on `target`
    pub fn allows(&self, name: &str, target: &Target) -> bool {
        self.abilities
            .iter()
            .any(|ability| ability.matches(name, target))
    }

    /// Whether a role with this exact name is held
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name == name)
    }

    /// Test role names according to `mode`
    ///
    /// With no names, `Any` is false while `All` and `None` hold vacuously.
    pub fn matches_roles<S: AsRef<str>>(&self, names: &[S], mode: RoleMatch) -> bool {
        match mode {
            RoleMatch::Any => names.iter().any(|name| self.has_role(name.as_ref())),
            RoleMatch::All => names.iter().all(|name| self.has_role(name.as_ref())),
            RoleMatch::None => !names.iter().any(|name| self.has_role(name.as_ref())),
        }
    }
}

/// Resolve the effective grants of `principal`
///
/// The store answers from one consistent state, so a check never mixes edges
/// from before and after a concurrent mutation.
pub fn resolve(store: &dyn GrantStore, principal: &Principal) -> Result<ResolvedGrants> {
    let grants = store.grants_of(principal)?;

    debug!(
        "Resolved {}: {} roles, {} abilities",
        principal,
        grants.roles.len(),
        grants.abilities.len()
    );
    Ok(grants)
}
