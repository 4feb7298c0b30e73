pub mod builders;
pub mod db;

pub use builders::{all_grants, grant_set, install, map, obj, role_id, tree, GrantBuilder};
pub use db::TestDb;
