use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::acl::errors::AclError;
use crate::entities::{acl_grant, acl_role, mapping};

/// Object type under which mapping records themselves carry grants.
pub const RELATIONSHIP_TYPE: &str = "Relationship";

/// Reference to an object: "type/id" e.g. "Audit/12"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: i32,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: i32) -> Self {
        Self {
            object_type: object_type.into(),
            object_id,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (t, id) = s.split_once('/')?;
        if t.is_empty() {
            return None;
        }
        Some(Self {
            object_type: t.to_string(),
            object_id: id.parse().ok()?,
        })
    }

    /// Like [`ObjectRef::parse`], for input coming off the wire.
    pub fn parse_input(s: &str) -> Result<Self, AclError> {
        Self::parse(s).ok_or_else(|| AclError::InvalidObjectRef(s.to_string()))
    }

    /// The grant-carrying record of a mapping edge.
    pub fn relationship(mapping_id: i32) -> Self {
        Self::new(RELATIONSHIP_TYPE, mapping_id)
    }

    pub fn is_relationship(&self) -> bool {
        self.object_type == RELATIONSHIP_TYPE
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object_type, self.object_id)
    }
}

/// A single permission an authorization check can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Update,
    Delete,
}

/// Read/update/delete bits carried by a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

impl Permissions {
    pub const READ: Permissions = Permissions {
        read: true,
        update: false,
        delete: false,
    };
    pub const RUD: Permissions = Permissions {
        read: true,
        update: true,
        delete: true,
    };

    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Update => self.update,
            Permission::Delete => self.delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.read || self.update || self.delete)
    }
}

impl FromStr for Permissions {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut perms = Permissions::default();
        for c in s.chars() {
            let bit = match c {
                'R' => &mut perms.read,
                'U' => &mut perms.update,
                'D' => &mut perms.delete,
                other => {
                    return Err(AclError::InvalidRuleTree(format!(
                        "unknown permission `{other}` in `{s}`"
                    )))
                }
            };
            if *bit {
                return Err(AclError::InvalidRuleTree(format!(
                    "permission `{c}` repeated in `{s}`"
                )));
            }
            *bit = true;
        }
        if perms.is_empty() {
            return Err(AclError::InvalidRuleTree(
                "empty permission set".to_string(),
            ));
        }
        Ok(perms)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            f.write_str("R")?;
        }
        if self.update {
            f.write_str("U")?;
        }
        if self.delete {
            f.write_str("D")?;
        }
        Ok(())
    }
}

/// A directly assignable role; `parent_role_id` is null in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootRole {
    pub id: i32,
    pub object_type: String,
    pub name: String,
    pub permissions: Permissions,
}

/// A role produced by propagation one level below `parent_role_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedRole {
    pub id: i32,
    pub object_type: String,
    pub name: String,
    pub permissions: Permissions,
    pub parent_role_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Role {
    Root(RootRole),
    Derived(DerivedRole),
}

impl Role {
    pub fn id(&self) -> i32 {
        match self {
            Role::Root(r) => r.id,
            Role::Derived(r) => r.id,
        }
    }

    pub fn object_type(&self) -> &str {
        match self {
            Role::Root(r) => &r.object_type,
            Role::Derived(r) => &r.object_type,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Role::Root(r) => &r.name,
            Role::Derived(r) => &r.name,
        }
    }

    pub fn permissions(&self) -> Permissions {
        match self {
            Role::Root(r) => r.permissions,
            Role::Derived(r) => r.permissions,
        }
    }

    pub fn parent_role_id(&self) -> Option<i32> {
        match self {
            Role::Root(_) => None,
            Role::Derived(r) => Some(r.parent_role_id),
        }
    }
}

impl From<acl_role::Model> for Role {
    fn from(m: acl_role::Model) -> Self {
        let permissions = Permissions {
            read: m.can_read,
            update: m.can_update,
            delete: m.can_delete,
        };
        match m.parent_role_id {
            None => Role::Root(RootRole {
                id: m.id,
                object_type: m.object_type,
                name: m.name,
                permissions,
            }),
            Some(parent_role_id) => Role::Derived(DerivedRole {
                id: m.id,
                object_type: m.object_type,
                name: m.name,
                permissions,
                parent_role_id,
            }),
        }
    }
}

impl TryFrom<Role> for RootRole {
    type Error = AclError;

    fn try_from(role: Role) -> Result<Self, Self::Error> {
        match role {
            Role::Root(r) => Ok(r),
            Role::Derived(r) => Err(AclError::InvalidGrantOperation(format!(
                "role `{}` on `{}` is propagated and cannot be assigned directly",
                r.name, r.object_type
            ))),
        }
    }
}

/// One row of the grant store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub id: i32,
    pub person_id: i32,
    pub role_id: i32,
    pub object: ObjectRef,
    pub parent_grant_id: Option<i32>,
    pub base_grant_id: i32,
}

impl Grant {
    pub fn is_root(&self) -> bool {
        self.parent_grant_id.is_none()
    }
}

impl From<acl_grant::Model> for Grant {
    fn from(m: acl_grant::Model) -> Self {
        Self {
            id: m.id,
            person_id: m.person_id,
            role_id: m.role_id,
            object: ObjectRef::new(m.object_type, m.object_id),
            parent_grant_id: m.parent_grant_id,
            base_grant_id: m.base_grant_id.unwrap_or(m.id),
        }
    }
}

/// An undirected mapping between two objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub id: i32,
    pub source: ObjectRef,
    pub destination: ObjectRef,
}

impl Edge {
    /// The endpoint opposite `from`, or `None` when `from` is not on this edge.
    pub fn far_side(&self, from: &ObjectRef) -> Option<&ObjectRef> {
        if &self.source == from {
            Some(&self.destination)
        } else if &self.destination == from {
            Some(&self.source)
        } else {
            None
        }
    }

    pub fn touches(&self, object: &ObjectRef) -> bool {
        &self.source == object || &self.destination == object
    }
}

impl From<mapping::Model> for Edge {
    fn from(m: mapping::Model) -> Self {
        Self {
            id: m.id,
            source: ObjectRef::new(m.source_type, m.source_id),
            destination: ObjectRef::new(m.destination_type, m.destination_id),
        }
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub person_id: i32,
    /// e.g. "Assessment/7"
    pub object: String,
    pub permission: Permission,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub person_id: i32,
    pub role_id: i32,
    /// e.g. "Audit/1"
    pub object: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub deleted: u64,
}

#[derive(Debug, Deserialize)]
pub struct MappingRequest {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    pub snapshots: Vec<SnapshotEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotEntry {
    pub snapshot_id: i32,
    /// e.g. "Audit/1"
    pub parent: String,
}

#[derive(Debug, Serialize)]
pub struct SeedResponse {
    pub inserted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_parse() {
        let r = ObjectRef::parse("Audit/12").unwrap();
        assert_eq!(r.object_type, "Audit");
        assert_eq!(r.object_id, 12);
        assert_eq!(r.to_string(), "Audit/12");

        assert!(ObjectRef::parse("noslash").is_none());
        assert!(ObjectRef::parse("/12").is_none());
        assert!(ObjectRef::parse("Audit/").is_none());
        assert!(ObjectRef::parse("Audit/abc").is_none());
    }

    #[test]
    fn test_permissions_parse_and_display() {
        let p: Permissions = "RUD".parse().unwrap();
        assert_eq!(p, Permissions::RUD);
        assert_eq!(p.to_string(), "RUD");

        let p: Permissions = "R".parse().unwrap();
        assert_eq!(p, Permissions::READ);
        assert!(p.allows(Permission::Read));
        assert!(!p.allows(Permission::Delete));

        let p: Permissions = "DR".parse().unwrap();
        assert_eq!(p.to_string(), "RD");

        assert!("".parse::<Permissions>().is_err());
        assert!("RX".parse::<Permissions>().is_err());
        assert!("RR".parse::<Permissions>().is_err());
    }

    #[test]
    fn test_role_variants_from_model() {
        let root = Role::from(acl_role::Model {
            id: 1,
            object_type: "Audit".into(),
            name: "Admin".into(),
            can_read: true,
            can_update: true,
            can_delete: false,
            internal: false,
            parent_role_id: None,
        });
        assert!(matches!(root, Role::Root(_)));
        assert_eq!(root.permissions().to_string(), "RU");
        assert!(RootRole::try_from(root).is_ok());

        let derived = Role::from(acl_role::Model {
            id: 2,
            object_type: "Assessment".into(),
            name: "Admin*Audit".into(),
            can_read: true,
            can_update: false,
            can_delete: false,
            internal: true,
            parent_role_id: Some(1),
        });
        assert_eq!(derived.parent_role_id(), Some(1));
        let err = RootRole::try_from(derived).unwrap_err();
        assert!(matches!(err, AclError::InvalidGrantOperation(_)));
    }

    #[test]
    fn test_edge_far_side() {
        let edge = Edge {
            id: 3,
            source: ObjectRef::new("Audit", 1),
            destination: ObjectRef::new("Assessment", 2),
        };
        assert_eq!(
            edge.far_side(&ObjectRef::new("Audit", 1)),
            Some(&ObjectRef::new("Assessment", 2))
        );
        assert_eq!(
            edge.far_side(&ObjectRef::new("Assessment", 2)),
            Some(&ObjectRef::new("Audit", 1))
        );
        assert_eq!(edge.far_side(&ObjectRef::new("Comment", 2)), None);
    }
}
