//! Grant storage
//!
//! [`GrantStore`] is the seam to whatever persists roles, abilities and edges.
//! The engine only ever talks to this trait. [`InMemoryGrantStore`] is the
//! bundled backend, built from [`IdentityStore`] and [`GrantGraph`], with JSON
//! snapshots for durability.

use crate::error::{AuthzError, Result};
use crate::graph::{Assignment, Grant, GrantGraph, Holder};
use crate::identity::{Ability, AbilityKey, IdentityStore, Role};
use crate::resolver::ResolvedGrants;
use crate::types::{AbilityId, Principal, RoleId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Persistence collaborator for roles, abilities and their edges
///
/// Implementations must make each mutating call atomic. Mutators return
/// whether the edge set actually changed. Errors are surfaced to engine
/// callers unchanged; the engine never retries.
///
/// Checks read through [`grants_of`](Self::grants_of) alone, which must
/// answer from a single consistent state (one lock guard, one transaction or
/// one snapshot read). The other read methods are independent calls and give
/// no consistency across each other.
pub trait GrantStore: Send + Sync {
    /// Look up a role by name without creating it
    fn find_role(&self, name: &str) -> Result<Option<Role>>;

    /// Return the role called `name`, creating it if needed
    fn find_or_create_role(&self, name: &str) -> Result<Role>;

    /// Replace a role's display title
    fn set_role_title(&self, role: RoleId, title: Option<String>) -> Result<Role>;

    /// Look up an ability by exact identity without creating it
    fn find_ability(&self, key: &AbilityKey) -> Result<Option<Ability>>;

    /// Return the ability with identity `key`, creating it if needed
    fn find_or_create_ability(&self, key: &AbilityKey) -> Result<Ability>;

    /// Every role, in creation order
    fn roles(&self) -> Result<Vec<Role>>;

    /// Every ability, in creation order
    fn abilities(&self) -> Result<Vec<Ability>>;

    /// Grant `ability` to `holder`
    fn grant(&self, holder: &Holder, ability: AbilityId) -> Result<bool>;

    /// Revoke `ability` from `holder`
    fn revoke(&self, holder: &Holder, ability: AbilityId) -> Result<bool>;

    /// Assign `role` to `principal`
    fn assign(&self, principal: &Principal, role: RoleId) -> Result<bool>;

    /// Remove the assignment of `role` from `principal`
    fn unassign(&self, principal: &Principal, role: RoleId) -> Result<bool>;

    /// Roles assigned to `principal`, ordered by id
    fn roles_of(&self, principal: &Principal) -> Result<Vec<Role>>;

    /// Abilities granted directly to `holder`, ordered by id
    fn direct_abilities_of(&self, holder: &Holder) -> Result<Vec<Ability>>;

    /// Principals currently assigned `role`
    fn principals_with_role(&self, role: RoleId) -> Result<Vec<Principal>>;

    /// Roles of `principal` and every ability reaching it, directly or
    /// through one of those roles, read from one consistent state
    fn grants_of(&self, principal: &Principal) -> Result<ResolvedGrants>;
}

/// Serializable image of an [`InMemoryGrantStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub abilities: Vec<Ability>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

#[derive(Debug, Default)]
struct StoreState {
    identity: IdentityStore,
    graph: GrantGraph,
}

/// In-memory grant store
#[derive(Debug)]
pub struct InMemoryGrantStore {
    state: RwLock<StoreState>,
}

impl InMemoryGrantStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                identity: IdentityStore::new(),
                graph: GrantGraph::new(),
            }),
        }
    }

    /// Capture the full store contents
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            roles: state.identity.roles().to_vec(),
            abilities: state.identity.abilities().to_vec(),
            assignments: state.graph.assignment_edges(),
            grants: state.graph.grant_edges(),
        }
    }

    /// Rebuild a store from a snapshot
    ///
    /// Every edge must reference an existing role and ability.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let identity = IdentityStore::restore(snapshot.roles, snapshot.abilities)?;
        let mut graph = GrantGraph::new();

        for assignment in snapshot.assignments {
            assignment.principal.validate()?;
            if identity.role(assignment.role_id).is_none() {
                return Err(AuthzError::invalid_argument(format!(
                    "assignment of {} references unknown role #{}",
                    assignment.principal, assignment.role_id
                )));
            }
            graph.assign(&assignment.principal, assignment.role_id);
        }

        for grant in snapshot.grants {
            match &grant.holder {
                Holder::Principal { principal } => principal.validate()?,
                Holder::Role { role_id } if identity.role(*role_id).is_none() => {
                    return Err(AuthzError::invalid_argument(format!(
                        "grant references unknown role #{}",
                        role_id
                    )));
                }
                Holder::Role { .. } => {}
            }
            if identity.ability(grant.ability_id).is_none() {
                return Err(AuthzError::invalid_argument(format!(
                    "grant to {} references unknown ability #{}",
                    grant.holder, grant.ability_id
                )));
            }
            graph.grant(&grant.holder, grant.ability_id);
        }

        Ok(Self {
            state: RwLock::new(StoreState { identity, graph }),
        })
    }

    /// Write the store to `path` as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, json)?;

        info!(
            "Saved grant store to {} ({} roles, {} abilities, {} assignments, {} grants)",
            path.display(),
            snapshot.roles.len(),
            snapshot.abilities.len(),
            snapshot.assignments.len(),
            snapshot.grants.len()
        );
        Ok(())
    }

    /// Load a store previously written by [`save`](Self::save)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&json)?;
        let store = Self::from_snapshot(snapshot)?;

        info!("Loaded grant store from {}", path.display());
        Ok(store)
    }

    fn resolve_abilities(identity: &IdentityStore, ids: Vec<AbilityId>) -> Vec<Ability> {
        ids.into_iter()
            .filter_map(|id| identity.ability(id).cloned())
            .collect()
    }
}

impl Default for InMemoryGrantStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GrantStore for InMemoryGrantStore {
    fn find_role(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.state.read().identity.find_role(name).cloned())
    }

    fn find_or_create_role(&self, name: &str) -> Result<Role> {
        if let Some(role) = self.find_role(name)? {
            return Ok(role);
        }
        let role = self.state.write().identity.find_or_create_role(name)?;
        debug!("Role '{}' resolved to #{}", role.name, role.id);
        Ok(role)
    }

    fn set_role_title(&self, role: RoleId, title: Option<String>) -> Result<Role> {
        self.state
            .write()
            .identity
            .set_role_title(role, title)
            .ok_or_else(|| AuthzError::invalid_argument(format!("unknown role #{}", role)))
    }

    fn find_ability(&self, key: &AbilityKey) -> Result<Option<Ability>> {
        Ok(self.state.read().identity.find_ability(key).cloned())
    }

    fn find_or_create_ability(&self, key: &AbilityKey) -> Result<Ability> {
        if let Some(ability) = self.find_ability(key)? {
            return Ok(ability);
        }
        let ability = self.state.write().identity.find_or_create_ability(key)?;
        debug!("Ability '{}' resolved to #{}", ability, ability.id);
        Ok(ability)
    }

    fn roles(&self) -> Result<Vec<Role>> {
        Ok(self.state.read().identity.roles().to_vec())
    }

    fn abilities(&self) -> Result<Vec<Ability>> {
        Ok(self.state.read().identity.abilities().to_vec())
    }

    fn grant(&self, holder: &Holder, ability: AbilityId) -> Result<bool> {
        Ok(self.state.write().graph.grant(holder, ability))
    }

    fn revoke(&self, holder: &Holder, ability: AbilityId) -> Result<bool> {
        Ok(self.state.write().graph.revoke(holder, ability))
    }

    fn assign(&self, principal: &Principal, role: RoleId) -> Result<bool> {
        Ok(self.state.write().graph.assign(principal, role))
    }

    fn unassign(&self, principal: &Principal, role: RoleId) -> Result<bool> {
        Ok(self.state.write().graph.unassign(principal, role))
    }

    fn roles_of(&self, principal: &Principal) -> Result<Vec<Role>> {
        let state = self.state.read();
        Ok(state
            .graph
            .roles_of(principal)
            .into_iter()
            .filter_map(|id| state.identity.role(id).cloned())
            .collect())
    }

    fn direct_abilities_of(&self, holder: &Holder) -> Result<Vec<Ability>> {
        let state = self.state.read();
        let ids = state.graph.direct_abilities_of(holder);
        Ok(Self::resolve_abilities(&state.identity, ids))
    }

    fn principals_with_role(&self, role: RoleId) -> Result<Vec<Principal>> {
        Ok(self.state.read().graph.members_of(role))
    }

    fn grants_of(&self, principal: &Principal) -> Result<ResolvedGrants> {
        let state = self.state.read();

        let role_ids = state.graph.roles_of(principal);
        let mut ability_ids = state
            .graph
            .direct_abilities_of(&Holder::principal(principal.clone()));
        for &role_id in &role_ids {
            ability_ids.extend(state.graph.direct_abilities_of(&Holder::role(role_id)));
        }

        let roles = role_ids
            .into_iter()
            .filter_map(|id| state.identity.role(id).cloned())
            .collect();
        let abilities = Self::resolve_abilities(&state.identity, ability_ids);

        Ok(ResolvedGrants::from_parts(roles, abilities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Target;

    #[test]
    fn test_store_upserts_and_edges() {
        let store = InMemoryGrantStore::new();
        let alice = Principal::user("alice");

        let admin = store.find_or_create_role("admin").unwrap();
        let ban = store
            .find_or_create_ability(&AbilityKey::unscoped("ban-users").unwrap())
            .unwrap();

        assert!(store.grant(&Holder::role(admin.id), ban.id).unwrap());
        assert!(store.assign(&alice, admin.id).unwrap());

        assert_eq!(store.roles_of(&alice).unwrap(), vec![admin.clone()]);
        assert_eq!(
            store.direct_abilities_of(&Holder::role(admin.id)).unwrap(),
            vec![ban]
        );
        assert_eq!(store.principals_with_role(admin.id).unwrap(), vec![alice]);
    }

    #[test]
    fn test_find_does_not_create() {
        let store = InMemoryGrantStore::new();

        assert!(store.find_role("ghost").unwrap().is_none());
        assert!(store
            .find_ability(&AbilityKey::new("edit", Target::of_type("Post")).unwrap())
            .unwrap()
            .is_none());
        assert!(store.roles().unwrap().is_empty());
        assert!(store.abilities().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_restores_edges() {
        let store = InMemoryGrantStore::new();
        let bob = Principal::user("bob");
        let editor = store.find_or_create_role("editor").unwrap();
        let edit = store
            .find_or_create_ability(&AbilityKey::new("edit", Target::of_type("Post")).unwrap())
            .unwrap();
        store.grant(&Holder::role(editor.id), edit.id).unwrap();
        store.grant(&Holder::principal(bob.clone()), edit.id).unwrap();
        store.assign(&bob, editor.id).unwrap();

        let snapshot = store.snapshot();
        let restored = InMemoryGrantStore::from_snapshot(snapshot.clone()).unwrap();

        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.roles_of(&bob).unwrap(), vec![editor]);
    }

    #[test]
    fn test_snapshot_rejects_dangling_edges() {
        let snapshot = Snapshot {
            assignments: vec![Assignment {
                principal: Principal::user(1),
                role_id: 9,
            }],
            ..Default::default()
        };
        let err = InMemoryGrantStore::from_snapshot(snapshot).unwrap_err();
        assert!(err.is_invalid_argument());

        let snapshot = Snapshot {
            grants: vec![Grant {
                holder: Holder::principal(Principal::user(1)),
                ability_id: 3,
            }],
            ..Default::default()
        };
        assert!(InMemoryGrantStore::from_snapshot(snapshot).is_err());
    }

    #[test]
    fn test_grants_of_unions_direct_and_role_grants() {
        let store = InMemoryGrantStore::new();
        let alice = Principal::user("alice");

        let admin = store.find_or_create_role("admin").unwrap();
        let ban = store
            .find_or_create_ability(&AbilityKey::unscoped("ban-users").unwrap())
            .unwrap();
        let read = store
            .find_or_create_ability(&AbilityKey::unscoped("read").unwrap())
            .unwrap();
        store.grant(&Holder::role(admin.id), ban.id).unwrap();
        store.grant(&Holder::role(admin.id), read.id).unwrap();
        store.grant(&Holder::principal(alice.clone()), read.id).unwrap();
        store.assign(&alice, admin.id).unwrap();

        let grants = store.grants_of(&alice).unwrap();
        assert_eq!(grants.roles, vec![admin]);
        assert_eq!(grants.abilities, vec![ban, read]);

        assert_eq!(
            store.grants_of(&Principal::user("bob")).unwrap(),
            ResolvedGrants::default()
        );
    }

    #[test]
    fn test_set_title_unknown_role() {
        let store = InMemoryGrantStore::new();
        assert!(store.set_role_title(42, Some("Nobody".into())).is_err());
    }
}
