//! Role to permission mapping

use std::collections::BTreeSet;

use crate::constants::{ROLE_ADMINISTRATOR, ROLE_STUDENT, ROLE_TEACHER};

/// Ordered permission set carried in token claims.
pub type Permissions = BTreeSet<String>;

/// Permissions granted by `role`. Unknown roles grant nothing.
pub fn resolve(role: &str) -> Permissions {
    let granted: &[&str] = match role {
        ROLE_ADMINISTRATOR => &["admin", "student", "teacher"],
        ROLE_TEACHER => &["teacher", "student"],
        ROLE_STUDENT => &["student"],
        _ => &[],
    };
    granted.iter().map(|p| p.to_string()).collect()
}
