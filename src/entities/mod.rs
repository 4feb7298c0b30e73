pub mod acl_grant;
pub mod acl_role;
pub mod acl_rule_version;
pub mod mapping;

pub use acl_grant::Entity as AclGrant;
pub use acl_role::Entity as AclRole;
pub use acl_rule_version::Entity as AclRuleVersion;
pub use mapping::Entity as Mapping;
