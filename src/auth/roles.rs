// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User roles for authorization.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Organization-scoped role carried in every token.
///
/// ## Role Semantics
///
/// - `Admin` - Full access, including credential deletion and the audit trail
/// - `Editor` - Can create and rotate cluster credentials
/// - `Viewer` - Read-only access to metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access
    Admin,
    /// Can mutate inventory resources
    Editor,
    /// Read-only access
    Viewer,
}

impl Role {
    /// All roles, most privileged first.
    pub const ALL: [Role; 3] = [Role::Admin, Role::Editor, Role::Viewer];

    /// Check whether this role is a member of `allowed`.
    ///
    /// Authorization is set membership, not a hierarchy: a route that lists
    /// only `Editor` does not implicitly admit `Admin`.
    pub fn is_in(&self, allowed: &[Role]) -> bool {
        allowed.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_exact() {
        assert!(Role::Admin.is_in(&[Role::Admin]));
        assert!(!Role::Viewer.is_in(&[Role::Admin]));
        assert!(!Role::Admin.is_in(&[Role::Editor]));
        assert!(Role::Editor.is_in(&[Role::Admin, Role::Editor]));
        assert!(!Role::Viewer.is_in(&[]));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
            let back: Role = serde_json::from_str(&json).unwrap();
            assert_eq!(back, role);
        }
        assert!(serde_json::from_str::<Role>("\"superuser\"").is_err());
    }
}
