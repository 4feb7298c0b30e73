//! Checked-in rule trees and the ordered history of changes between them.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use serde_json::{json, Value};

use crate::acl::differ::DiffReport;
use crate::acl::engine::Engine;
use crate::acl::errors::AclError;
use crate::acl::tree::RuleTree;
use crate::entities::acl_rule_version;

/// One rule-tree change: the tree it expects to find and the tree it leaves.
#[derive(Debug, Clone, Copy)]
pub struct RuleMigration {
    pub name: &'static str,
    pub old: fn() -> Value,
    pub new: fn() -> Value,
}

fn empty() -> Value {
    json!({})
}

pub fn audit_propagation_v1() -> Value {
    json!({
        "Program": {
            "Program Managers RUD": {
                "Audit RUD": {
                    "Assessment RUD": { "Comment R": {} },
                    "Snapshot RU": {}
                }
            },
            "Program Readers R": { "Audit R": {} }
        },
        "Audit": {
            "Admin RUD": {
                "Assessment RUD": { "Comment R": {} },
                "Snapshot RUD": {}
            },
            "Auditors RU": {
                "Assessment RU": {},
                "Snapshot R": {}
            }
        },
        "Assessment": {
            "Assignees RU": {
                "Relationship R": { "Comment R": {} }
            }
        }
    })
}

/// Auditors follow assessments into their evidence and comments; program
/// readers see assessments; assignees no longer edit through the relationship.
pub fn audit_propagation_v2() -> Value {
    json!({
        "Program": {
            "Program Managers RUD": {
                "Audit RUD": {
                    "Assessment RUD": { "Comment R": {} },
                    "Snapshot RU": {}
                }
            },
            "Program Readers R": { "Audit R": { "Assessment R": {} } }
        },
        "Audit": {
            "Admin RUD": {
                "Assessment RUD": { "Comment R": {} },
                "Snapshot RUD": {}
            },
            "Auditors RU": {
                "Assessment RU": { "Evidence R": {}, "Comment R": {} },
                "Snapshot R": {}
            }
        },
        "Assessment": {
            "Assignees R": {
                "Relationship R": { "Comment R": {} }
            }
        }
    })
}

/// Every rule change, oldest first.
pub fn history() -> Vec<RuleMigration> {
    vec![
        RuleMigration {
            name: "0001_audit_propagation",
            old: empty,
            new: audit_propagation_v1,
        },
        RuleMigration {
            name: "0002_auditor_evidence",
            old: audit_propagation_v1,
            new: audit_propagation_v2,
        },
    ]
}

impl Engine {
    /// Apply the rule changes of `history` not yet recorded as applied.
    /// Returns how many were applied by this call.
    pub async fn apply_rule_history<C: TransactionTrait>(
        &self,
        db: &C,
        history: &[RuleMigration],
    ) -> Result<usize, AclError> {
        let mut applied = 0;
        for migration in history {
            let txn = db.begin().await?;
            if acl_rule_version::Entity::find_by_id(migration.name)
                .one(&txn)
                .await?
                .is_some()
            {
                continue;
            }

            let old = RuleTree::from_json(&(migration.old)())?;
            let new = RuleTree::from_json(&(migration.new)())?;
            let report: DiffReport = self.diff_and_apply(&txn, &old, &new).await?;

            acl_rule_version::ActiveModel {
                name: Set(migration.name.to_string()),
                applied_at: Set(Utc::now().timestamp()),
            }
            .insert(&txn)
            .await?;
            txn.commit().await?;

            tracing::info!(
                migration = migration.name,
                already_applied = report.already_applied,
                "Recorded rule migration"
            );
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_trees_are_valid() {
        for migration in history() {
            let old = RuleTree::from_json(&(migration.old)()).unwrap();
            let new = RuleTree::from_json(&(migration.new)()).unwrap();
            old.flatten().unwrap();
            new.flatten().unwrap();
        }
    }

    #[test]
    fn test_history_is_chained() {
        let history = history();
        for pair in history.windows(2) {
            assert_eq!((pair[0].new)(), (pair[1].old)(), "{} -> {}", pair[0].name, pair[1].name);
        }
    }
}
