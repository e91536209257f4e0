//! Core grant engine types

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique role identifier
pub type RoleId = u64;

/// Unique ability identifier
pub type AbilityId = u64;

/// Principal (user, service account, team) that can hold roles and abilities
///
/// Identified by a type tag plus a stable id so that several kinds of
/// principal can share one engine without id collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Principal {
    /// Principal type (user, service, team, etc.)
    #[serde(rename = "type")]
    pub principal_type: String,

    /// Stable identifier within the principal type
    pub id: String,
}

impl Principal {
    /// Create a new principal
    pub fn new(principal_type: impl Into<String>, id: impl ToString) -> Self {
        Self {
            principal_type: principal_type.into(),
            id: id.to_string(),
        }
    }

    /// Shorthand for a `user` principal
    pub fn user(id: impl ToString) -> Self {
        Self::new("user", id)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.principal_type.trim().is_empty() {
            return Err(AuthzError::invalid_argument(format!(
                "principal '{}' has an empty type tag",
                self.id
            )));
        }
        if self.id.trim().is_empty() {
            return Err(AuthzError::invalid_argument(format!(
                "principal of type '{}' has an empty id",
                self.principal_type
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.principal_type, self.id)
    }
}

impl FromStr for Principal {
    type Err = AuthzError;

    /// Parse `"type:id"`, e.g. `"user:42"`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((principal_type, id)) => {
                let principal = Self::new(principal_type, id);
                principal.validate()?;
                Ok(principal)
            }
            None => Err(AuthzError::invalid_argument(format!(
                "principal '{}' must be written as 'type:id'",
                s
            ))),
        }
    }
}

/// Capability of a host type to hold roles and abilities
///
/// Implement this for your user model (or anything else that should be
/// authorized) so it can be handed straight to the engine.
pub trait Authorizable {
    /// Stable principal identity for this value
    fn principal(&self) -> Principal;
}

impl Authorizable for Principal {
    fn principal(&self) -> Principal {
        self.clone()
    }
}

/// A host model that abilities can be scoped to
///
/// ```
/// use gatehouse_authz::{Entity, Target};
///
/// struct Post { id: u64 }
///
/// impl Entity for Post {
///     const ENTITY_TYPE: &'static str = "Post";
///     fn entity_id(&self) -> String { self.id.to_string() }
/// }
///
/// assert_eq!(Target::of::<Post>(), Target::of_type("Post"));
/// assert_eq!(Target::from(&Post { id: 7 }), Target::instance("Post", 7));
/// ```
pub trait Entity {
    /// Type tag shared by every instance
    const ENTITY_TYPE: &'static str;

    /// Identifier of this instance
    fn entity_id(&self) -> String;
}

/// What an ability is scoped to, or what a check is asking about
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Target {
    /// No scope: a plain named ability
    #[default]
    Unscoped,

    /// Every entity of a type
    Type { entity_type: String },

    /// One specific entity
    Instance {
        entity_type: String,
        entity_id: String,
    },
}

impl Target {
    /// Scope to every entity of `entity_type`
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self::Type {
            entity_type: entity_type.into(),
        }
    }

    /// Scope to every entity of the host type `E`
    pub fn of<E: Entity>() -> Self {
        Self::of_type(E::ENTITY_TYPE)
    }

    /// Scope to a single entity
    pub fn instance(entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        Self::Instance {
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
        }
    }

    /// Type tag of the target, if any
    pub fn entity_type(&self) -> Option<&str> {
        match self {
            Self::Unscoped => None,
            Self::Type { entity_type } | Self::Instance { entity_type, .. } => Some(entity_type),
        }
    }

    /// Instance id of the target, if any
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::Instance { entity_id, .. } => Some(entity_id),
            _ => None,
        }
    }

    /// Reject targets whose type cannot be determined
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Unscoped => Ok(()),
            Self::Type { entity_type } if entity_type.trim().is_empty() => Err(
                AuthzError::invalid_argument("target type tag cannot be empty"),
            ),
            Self::Instance { entity_type, entity_id } => {
                if entity_type.trim().is_empty() {
                    return Err(AuthzError::invalid_argument(format!(
                        "target instance '{}' has no type tag",
                        entity_id
                    )));
                }
                if entity_id.trim().is_empty() {
                    return Err(AuthzError::invalid_argument(format!(
                        "target instance of type '{}' has an empty id",
                        entity_type
                    )));
                }
                Ok(())
            }
            Self::Type { .. } => Ok(()),
        }
    }
}

impl<E: Entity> From<&E> for Target {
    fn from(entity: &E) -> Self {
        Self::instance(E::ENTITY_TYPE, entity.entity_id())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unscoped => write!(f, "*unscoped*"),
            Self::Type { entity_type } => write!(f, "{}", entity_type),
            Self::Instance {
                entity_type,
                entity_id,
            } => write!(f, "{}#{}", entity_type, entity_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Post {
        id: u32,
    }

    impl Entity for Post {
        const ENTITY_TYPE: &'static str = "Post";

        fn entity_id(&self) -> String {
            self.id.to_string()
        }
    }

    #[test]
    fn test_principal_parse() {
        let principal: Principal = "user:alice".parse().unwrap();
        assert_eq!(principal.principal_type, "user");
        assert_eq!(principal.id, "alice");
        assert_eq!(principal.to_string(), "user:alice");

        assert!("alice".parse::<Principal>().is_err());
        assert!(":alice".parse::<Principal>().is_err());
        assert!("user:".parse::<Principal>().is_err());
    }

    #[test]
    fn test_principal_types_are_distinct() {
        assert_ne!(Principal::new("user", 1), Principal::new("team", 1));
    }

    #[test]
    fn test_target_from_entity() {
        let post = Post { id: 12 };
        let target = Target::from(&post);

        assert_eq!(target.entity_type(), Some("Post"));
        assert_eq!(target.entity_id(), Some("12"));
        assert_eq!(target.to_string(), "Post#12");
        assert_eq!(Target::of::<Post>().entity_id(), None);
    }

    #[test]
    fn test_target_validation() {
        assert!(Target::Unscoped.validate().is_ok());
        assert!(Target::of_type("Post").validate().is_ok());
        assert!(Target::instance("Post", 1).validate().is_ok());

        let err = Target::of_type("  ").validate().unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(Target::instance("", 1).validate().is_err());
        assert!(Target::instance("Post", "").validate().is_err());
    }
}
