//! Role and ability entities with upsert-by-identity registry
//!
//! Roles are identified by name alone. Abilities are identified by the triple
//! `(name, entity type, entity id)`: `edit`, `edit on Post` and `edit on Post#3`
//! are three different abilities. Identity fields never change once an entity
//! exists; only the display title does.

use crate::error::{AuthzError, Result};
use crate::types::{AbilityId, RoleId, Target};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Named, shareable bundle of abilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,

    /// Unique, case-sensitive role name (e.g. "admin")
    pub name: String,

    /// Optional display title (e.g. "Administrator")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Structural identity of an ability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbilityKey {
    pub name: String,
    pub target: Target,
}

impl AbilityKey {
    /// Build and validate an ability identity
    pub fn new(name: impl Into<String>, target: Target) -> Result<Self> {
        let name = name.into();
        validate_name("ability", &name)?;
        target.validate()?;
        Ok(Self { name, target })
    }

    /// Identity of a plain, unscoped ability
    pub fn unscoped(name: impl Into<String>) -> Result<Self> {
        Self::new(name, Target::Unscoped)
    }
}

/// Named permission, optionally scoped to an entity type or instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    pub id: AbilityId,

    /// Ability name (e.g. "edit")
    pub name: String,

    /// Scope of the grant
    #[serde(default)]
    pub target: Target,

    pub created_at: DateTime<Utc>,
}

impl Ability {
    /// Identity triple of this ability
    pub fn key(&self) -> AbilityKey {
        AbilityKey {
            name: self.name.clone(),
            target: self.target.clone(),
        }
    }

    /// Whether holding this ability satisfies a check for `name` on `query`
    ///
    /// Names must match exactly. A type-scoped ability also covers every
    /// instance of that type; an instance-scoped ability never covers the type
    /// as a whole, and unscoped abilities only answer unscoped checks.
    pub fn matches(&self, name: &str, query: &Target) -> bool {
        if self.name != name {
            return false;
        }

        match (&self.target, query) {
            (Target::Unscoped, Target::Unscoped) => true,
            (Target::Type { entity_type: granted }, Target::Type { entity_type: asked }) => {
                granted == asked
            }
            (
                Target::Type { entity_type: granted },
                Target::Instance {
                    entity_type: asked, ..
                },
            ) => granted == asked,
            (
                Target::Instance {
                    entity_type: granted_type,
                    entity_id: granted_id,
                },
                Target::Instance {
                    entity_type: asked_type,
                    entity_id: asked_id,
                },
            ) => granted_type == asked_type && granted_id == asked_id,
            _ => false,
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Unscoped => write!(f, "{}", self.name),
            target => write!(f, "{} on {}", self.name, target),
        }
    }
}

pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AuthzError::invalid_argument(format!(
            "{} name cannot be empty",
            kind
        )));
    }
    Ok(())
}

/// Next id after `id`; the largest id leaves no room for a successor
fn successor(kind: &str, id: u64) -> Result<u64> {
    id.checked_add(1).ok_or_else(|| {
        AuthzError::invalid_argument(format!("{} id {} leaves no id for new entries", kind, id))
    })
}

/// Registry of every role and ability ever referenced
///
/// Ids are handed out sequentially, so iteration in id order is creation
/// order.
#[derive(Debug, Default)]
pub struct IdentityStore {
    roles: Vec<Role>,
    role_index: HashMap<String, usize>,
    abilities: Vec<Ability>,
    ability_index: HashMap<AbilityKey, usize>,
    next_role_id: RoleId,
    next_ability_id: AbilityId,
}

impl IdentityStore {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_role_id: 1,
            next_ability_id: 1,
            ..Default::default()
        }
    }

    /// Look up a role by name
    pub fn find_role(&self, name: &str) -> Option<&Role> {
        self.role_index.get(name).map(|&idx| &self.roles[idx])
    }

    /// Look up a role by id
    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles
            .binary_search_by_key(&id, |role| role.id)
            .ok()
            .map(|idx| &self.roles[idx])
    }

    /// Return the role called `name`, creating it if needed
    pub fn find_or_create_role(&mut self, name: &str) -> Result<Role> {
        validate_name("role", name)?;

        if let Some(role) = self.find_role(name) {
            return Ok(role.clone());
        }

        let id = self.next_role_id;
        self.next_role_id = successor("role", id)?;
        let role = Role {
            id,
            name: name.to_string(),
            title: None,
            created_at: Utc::now(),
        };
        self.role_index.insert(role.name.clone(), self.roles.len());
        self.roles.push(role.clone());

        Ok(role)
    }

    /// Replace a role's display title
    pub fn set_role_title(&mut self, id: RoleId, title: Option<String>) -> Option<Role> {
        let idx = self.roles.binary_search_by_key(&id, |role| role.id).ok()?;
        self.roles[idx].title = title;
        Some(self.roles[idx].clone())
    }

    /// Look up an ability by exact identity
    pub fn find_ability(&self, key: &AbilityKey) -> Option<&Ability> {
        self.ability_index.get(key).map(|&idx| &self.abilities[idx])
    }

    /// Look up an ability by id
    pub fn ability(&self, id: AbilityId) -> Option<&Ability> {
        self.abilities
            .binary_search_by_key(&id, |ability| ability.id)
            .ok()
            .map(|idx| &self.abilities[idx])
    }

    /// Return the ability with identity `key`, creating it if needed
    pub fn find_or_create_ability(&mut self, key: &AbilityKey) -> Result<Ability> {
        if let Some(ability) = self.find_ability(key) {
            return Ok(ability.clone());
        }

        let id = self.next_ability_id;
        self.next_ability_id = successor("ability", id)?;
        let ability = Ability {
            id,
            name: key.name.clone(),
            target: key.target.clone(),
            created_at: Utc::now(),
        };
        self.ability_index.insert(key.clone(), self.abilities.len());
        self.abilities.push(ability.clone());

        Ok(ability)
    }

    /// All roles in creation order
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// All abilities in creation order
    pub fn abilities(&self) -> &[Ability] {
        &self.abilities
    }

    /// Rebuild a registry from previously persisted entities
    ///
    /// Fails if two entities share an id or an identity.
    pub fn restore(mut roles: Vec<Role>, mut abilities: Vec<Ability>) -> Result<Self> {
        roles.sort_by_key(|role| role.id);
        abilities.sort_by_key(|ability| ability.id);

        let mut store = Self::new();

        for role in roles {
            validate_name("role", &role.name)?;
            if store.roles.last().is_some_and(|last| last.id == role.id) {
                return Err(AuthzError::invalid_argument(format!(
                    "duplicate role id {}",
                    role.id
                )));
            }
            if store.role_index.contains_key(&role.name) {
                return Err(AuthzError::invalid_argument(format!(
                    "duplicate role name '{}'",
                    role.name
                )));
            }
            store.next_role_id = store.next_role_id.max(successor("role", role.id)?);
            store.role_index.insert(role.name.clone(), store.roles.len());
            store.roles.push(role);
        }

        for ability in abilities {
            let key = AbilityKey::new(ability.name.clone(), ability.target.clone())?;
            if store.abilities.last().is_some_and(|last| last.id == ability.id) {
                return Err(AuthzError::invalid_argument(format!(
                    "duplicate ability id {}",
                    ability.id
                )));
            }
            if store.ability_index.contains_key(&key) {
                return Err(AuthzError::invalid_argument(format!(
                    "duplicate ability '{}'",
                    ability
                )));
            }
            store.next_ability_id = store.next_ability_id.max(successor("ability", ability.id)?);
            store.ability_index.insert(key, store.abilities.len());
            store.abilities.push(ability);
        }

        Ok(store)
    }
}
