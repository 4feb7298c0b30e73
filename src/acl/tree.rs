//! Rule trees: which roles propagate to which related object types.
//!
//! Trees are checked in as JSON literals of the form
//! `{"Audit": {"Admin RUD": {"Assessment RUD": {"Comment R": {}}}}}` and parsed
//! into [`RuleTree`]. Flattening a tree yields one [`RoleSpec`] per registry row.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::acl::errors::AclError;
use crate::acl::types::{Permissions, RELATIONSHIP_TYPE};

/// One propagation hop: the object type reached and the permissions granted there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeLabel {
    Object {
        object_type: String,
        permissions: Permissions,
    },
    /// Lands on the mapping record itself; the next hop leaves through its endpoints.
    Relationship { permissions: Permissions },
}

impl EdgeLabel {
    pub fn object(object_type: impl Into<String>, permissions: Permissions) -> Self {
        EdgeLabel::Object {
            object_type: object_type.into(),
            permissions,
        }
    }

    pub fn relationship(permissions: Permissions) -> Self {
        EdgeLabel::Relationship { permissions }
    }

    pub fn target_type(&self) -> &str {
        match self {
            EdgeLabel::Object { object_type, .. } => object_type,
            EdgeLabel::Relationship { .. } => RELATIONSHIP_TYPE,
        }
    }

    pub fn permissions(&self) -> Permissions {
        match self {
            EdgeLabel::Object { permissions, .. } | EdgeLabel::Relationship { permissions } => {
                *permissions
            }
        }
    }
}

impl FromStr for EdgeLabel {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, permissions) = split_label(s)?;
        if name == RELATIONSHIP_TYPE {
            Ok(EdgeLabel::relationship(permissions))
        } else {
            Ok(EdgeLabel::object(name, permissions))
        }
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target_type(), self.permissions())
    }
}

/// Splits "Audit Captains RUD" into ("Audit Captains", RUD).
fn split_label(s: &str) -> Result<(&str, Permissions), AclError> {
    let (name, perms) = s
        .trim()
        .rsplit_once(' ')
        .ok_or_else(|| AclError::InvalidRuleTree(format!("label `{s}` has no permissions")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(AclError::InvalidRuleTree(format!("label `{s}` has no name")));
    }
    Ok((name, perms.parse()?))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleNode {
    pub children: BTreeMap<EdgeLabel, RuleNode>,
}

impl RuleNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: EdgeLabel, child: RuleNode) -> Self {
        self.children.insert(label, child);
        self
    }

    fn depth(&self) -> usize {
        self.children
            .values()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    fn from_json(value: &Value) -> Result<Self, AclError> {
        let map = value
            .as_object()
            .ok_or_else(|| AclError::InvalidRuleTree(format!("expected an object, got {value}")))?;
        let mut node = RuleNode::new();
        for (label, child) in map {
            node.children
                .insert(label.parse()?, RuleNode::from_json(child)?);
        }
        Ok(node)
    }
}

/// A directly assignable role and everything that propagates from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRule {
    pub permissions: Permissions,
    pub node: RuleNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleTree {
    /// object_type -> role name -> rule
    pub roots: BTreeMap<String, BTreeMap<String, RootRule>>,
}

impl RuleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(
        mut self,
        object_type: impl Into<String>,
        role: impl Into<String>,
        permissions: Permissions,
        node: RuleNode,
    ) -> Self {
        self.roots
            .entry(object_type.into())
            .or_default()
            .insert(role.into(), RootRule { permissions, node });
        self
    }

    pub fn from_json(value: &Value) -> Result<Self, AclError> {
        let types = value.as_object().ok_or_else(|| {
            AclError::InvalidRuleTree("rule tree must be an object keyed by object type".into())
        })?;
        let mut tree = RuleTree::new();
        for (object_type, roles) in types {
            let roles = roles.as_object().ok_or_else(|| {
                AclError::InvalidRuleTree(format!("roles of `{object_type}` must be an object"))
            })?;
            for (label, node) in roles {
                let (name, permissions) = split_label(label)?;
                if tree
                    .roots
                    .get(object_type.as_str())
                    .is_some_and(|defined| defined.contains_key(name))
                {
                    return Err(AclError::InvalidRuleTree(format!(
                        "role `{name}` on `{object_type}` defined twice"
                    )));
                }
                tree = tree.with_root(
                    object_type.as_str(),
                    name,
                    permissions,
                    RuleNode::from_json(node)?,
                );
            }
        }
        Ok(tree)
    }

    /// Number of propagation hops below the deepest root.
    pub fn depth(&self) -> usize {
        self.roots
            .values()
            .flat_map(|roles| roles.values())
            .map(|r| r.node.depth())
            .max()
            .unwrap_or(0)
    }

    /// Depth-first walk producing one spec per role; parents precede their children.
    pub fn flatten(&self) -> Result<Vec<RoleSpec>, AclError> {
        let mut specs = Vec::new();
        let mut keys = HashSet::new();
        for (object_type, roles) in &self.roots {
            for (name, rule) in roles {
                let key = RoleKey::new(object_type.as_str(), name.as_str());
                push_spec(&mut specs, &mut keys, key.clone(), rule.permissions, None)?;
                flatten_node(&rule.node, &key, &mut specs, &mut keys)?;
            }
        }
        Ok(specs)
    }
}

fn flatten_node(
    node: &RuleNode,
    parent: &RoleKey,
    specs: &mut Vec<RoleSpec>,
    keys: &mut HashSet<RoleKey>,
) -> Result<(), AclError> {
    let mut targets = HashSet::new();
    for (label, child) in &node.children {
        if !targets.insert(label.target_type()) {
            return Err(AclError::InvalidRuleTree(format!(
                "{parent} propagates to `{}` more than once",
                label.target_type()
            )));
        }
        let key = RoleKey::new(label.target_type(), derived_role_name(parent));
        push_spec(specs, keys, key.clone(), label.permissions(), Some(parent.clone()))?;
        flatten_node(child, &key, specs, keys)?;
    }
    Ok(())
}

fn push_spec(
    specs: &mut Vec<RoleSpec>,
    keys: &mut HashSet<RoleKey>,
    key: RoleKey,
    permissions: Permissions,
    parent: Option<RoleKey>,
) -> Result<(), AclError> {
    if !keys.insert(key.clone()) {
        return Err(AclError::InvalidRuleTree(format!("role {key} defined twice")));
    }
    specs.push(RoleSpec {
        key,
        permissions,
        parent,
    });
    Ok(())
}

/// Name of the role one hop below `parent`. Deterministic in the path, so
/// re-flattening a tree always yields the same registry keys.
pub fn derived_role_name(parent: &RoleKey) -> String {
    format!("{}*{}", parent.name, parent.object_type)
}

/// Registry identity of a role: `(object_type, name)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleKey {
    pub object_type: String,
    pub name: String,
}

impl RoleKey {
    pub fn new(object_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` on `{}`", self.name, self.object_type)
    }
}

/// One role as described by a rule tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub key: RoleKey,
    pub permissions: Permissions,
    pub parent: Option<RoleKey>,
}

impl RoleSpec {
    /// Propagated roles are not assignable by users.
    pub fn internal(&self) -> bool {
        self.parent.is_some()
    }
}
