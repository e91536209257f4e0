//! Grant graph: principal -> role assignments and holder -> ability grants
//!
//! Edges are sets, so granting or assigning twice is a no-op and removing an
//! absent edge is a no-op. Every mutator reports whether it changed anything.
//! A reverse index from role to members lets callers find every principal a
//! role change reaches.

use crate::types::{AbilityId, Principal, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Anything abilities can be granted to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Holder {
    Principal { principal: Principal },
    Role { role_id: RoleId },
}

impl Holder {
    pub fn principal(principal: Principal) -> Self {
        Self::Principal { principal }
    }

    pub fn role(role_id: RoleId) -> Self {
        Self::Role { role_id }
    }
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal { principal } => write!(f, "{}", principal),
            Self::Role { role_id } => write!(f, "role#{}", role_id),
        }
    }
}

/// Holder -> ability edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub holder: Holder,
    pub ability_id: AbilityId,
}

/// Principal -> role edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub principal: Principal,
    pub role_id: RoleId,
}

/// In-memory edge sets
#[derive(Debug, Default)]
pub struct GrantGraph {
    assignments: HashMap<Principal, BTreeSet<RoleId>>,
    members: HashMap<RoleId, BTreeSet<Principal>>,
    grants: HashMap<Holder, BTreeSet<AbilityId>>,
}

impl GrantGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a grant edge; returns false if it already existed
    pub fn grant(&mut self, holder: &Holder, ability: AbilityId) -> bool {
        self.grants.entry(holder.clone()).or_default().insert(ability)
    }

    /// Remove a grant edge; returns false if it was absent
    pub fn revoke(&mut self, holder: &Holder, ability: AbilityId) -> bool {
        let Some(abilities) = self.grants.get_mut(holder) else {
            return false;
        };
        let removed = abilities.remove(&ability);
        if abilities.is_empty() {
            self.grants.remove(holder);
        }
        removed
    }

    /// Add an assignment edge; returns false if it already existed
    pub fn assign(&mut self, principal: &Principal, role: RoleId) -> bool {
        let added = self
            .assignments
            .entry(principal.clone())
            .or_default()
            .insert(role);
        if added {
            self.members.entry(role).or_default().insert(principal.clone());
        }
        added
    }

    /// Remove an assignment edge; returns false if it was absent
    pub fn unassign(&mut self, principal: &Principal, role: RoleId) -> bool {
        let Some(roles) = self.assignments.get_mut(principal) else {
            return false;
        };
        let removed = roles.remove(&role);
        if roles.is_empty() {
            self.assignments.remove(principal);
        }

        if removed {
            if let Some(members) = self.members.get_mut(&role) {
                members.remove(principal);
                if members.is_empty() {
                    self.members.remove(&role);
                }
            }
        }
        removed
    }

    /// Role ids assigned to `principal`, ascending
    pub fn roles_of(&self, principal: &Principal) -> Vec<RoleId> {
        self.assignments
            .get(principal)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ability ids granted directly to `holder`, ascending
    pub fn direct_abilities_of(&self, holder: &Holder) -> Vec<AbilityId> {
        self.grants
            .get(holder)
            .map(|abilities| abilities.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Principals currently assigned `role`
    pub fn members_of(&self, role: RoleId) -> Vec<Principal> {
        self.members
            .get(&role)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every grant edge, ordered by holder then ability
    pub fn grant_edges(&self) -> Vec<Grant> {
        let mut holders: Vec<_> = self.grants.keys().collect();
        holders.sort();

        holders
            .into_iter()
            .flat_map(|holder| {
                self.grants[holder].iter().map(move |&ability_id| Grant {
                    holder: holder.clone(),
                    ability_id,
                })
            })
            .collect()
    }

    /// Every assignment edge, ordered by principal then role
    pub fn assignment_edges(&self) -> Vec<Assignment> {
        let mut principals: Vec<_> = self.assignments.keys().collect();
        principals.sort();

        principals
            .into_iter()
            .flat_map(|principal| {
                self.assignments[principal].iter().map(move |&role_id| Assignment {
                    principal: principal.clone(),
                    role_id,
                })
            })
            .collect()
    }
}
