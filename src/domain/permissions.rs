use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

pub const USER_READ: &str = "user:read";
pub const USER_MANAGE: &str = "user:manage";
pub const ROLE_MANAGE: &str = "role:manage";
pub const COURSE_MANAGE: &str = "course:manage";
pub const SURVEY_MANAGE: &str = "survey:manage";
pub const SURVEY_READ_ALL: &str = "survey:read_all";
pub const APPOINTMENT_MANAGE: &str = "appointment:manage";
pub const CERTIFICATE_ISSUE: &str = "certificate:issue";

pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_CONSULTANT: &str = "Consultant";
pub const ROLE_MEMBER: &str = "Member";

/// Every permission string a role may carry.
pub static CATALOGUE: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        USER_READ,
        USER_MANAGE,
        ROLE_MANAGE,
        COURSE_MANAGE,
        SURVEY_MANAGE,
        SURVEY_READ_ALL,
        APPOINTMENT_MANAGE,
        CERTIFICATE_ISSUE,
    ]
    .into_iter()
    .collect()
});

pub fn is_known_permission(permission: &str) -> bool {
    CATALOGUE.contains(permission)
}

/// A role as seen by the authorization check: its name and flattened permission set.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoleGrant {
    pub id: i64,
    pub name: String,
    pub permissions: HashSet<String>,
}

/// The authenticated caller. `role` is `None` for users without an assigned role,
/// who hold no permissions at all.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Option<RoleGrant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Permission(&'static str),
    Role(&'static str),
}

/// A disjunction of grants: satisfied when the caller holds any one of them.
/// An empty requirement is never satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    any_of: Vec<Grant>,
}

impl Requirement {
    pub fn permission(permission: &'static str) -> Self {
        Self {
            any_of: vec![Grant::Permission(permission)],
        }
    }

    pub fn or_permission(mut self, permission: &'static str) -> Self {
        self.any_of.push(Grant::Permission(permission));
        self
    }

    pub fn or_role(mut self, role: &'static str) -> Self {
        self.any_of.push(Grant::Role(role));
        self
    }

    fn describe(&self) -> String {
        self.any_of
            .iter()
            .map(|g| match g {
                Grant::Permission(p) => format!("permission '{p}'"),
                Grant::Role(r) => format!("role '{r}'"),
            })
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("access denied: requires {required}")]
pub struct AccessDenied {
    pub required: String,
}

/// Pure authorization predicate.
pub fn is_authorized(role: Option<&RoleGrant>, requirement: &Requirement) -> bool {
    let Some(role) = role else {
        return false;
    };
    requirement.any_of.iter().any(|grant| match grant {
        Grant::Permission(p) => role.permissions.contains(*p),
        Grant::Role(r) => role.name == *r,
    })
}

impl Principal {
    pub fn can(&self, requirement: &Requirement) -> bool {
        is_authorized(self.role.as_ref(), requirement)
    }

    pub fn authorize(&self, requirement: &Requirement) -> Result<(), AccessDenied> {
        if self.can(requirement) {
            Ok(())
        } else {
            tracing::warn!(
                "Access denied for user {}: requires {}",
                self.user_id,
                requirement.describe()
            );
            Err(AccessDenied {
                required: requirement.describe(),
            })
        }
    }

    pub fn permissions(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .role
            .as_ref()
            .map(|r| r.permissions.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, perms: &[&str]) -> RoleGrant {
        RoleGrant {
            id: 1,
            name: name.to_string(),
            permissions: perms.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn role_only(name: &'static str) -> Requirement {
        Requirement {
            any_of: vec![Grant::Role(name)],
        }
    }

    fn principal(role: Option<RoleGrant>) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            full_name: "Someone".to_string(),
            role,
        }
    }

    #[test]
    fn admin_role_without_permissions_passes_role_check_only() {
        let admin = role("Admin", &[]);
        assert!(is_authorized(Some(&admin), &role_only("Admin")));
        assert!(!is_authorized(Some(&admin), &Requirement::permission("X")));

        let admin_with_x = role("Admin", &["X"]);
        assert!(is_authorized(Some(&admin_with_x), &Requirement::permission("X")));
    }

    #[test]
    fn unassigned_role_is_never_authorized() {
        assert!(!is_authorized(None, &role_only(ROLE_MEMBER)));
        assert!(!is_authorized(None, &Requirement::permission(USER_READ)));
        assert!(principal(None).authorize(&Requirement::permission(USER_READ)).is_err());
    }

    #[test]
    fn disjunction_accepts_any_grant() {
        let manager = role("Manager", &[COURSE_MANAGE]);
        let req = Requirement::permission(ROLE_MANAGE)
            .or_permission(COURSE_MANAGE)
            .or_role(ROLE_ADMIN);
        assert!(is_authorized(Some(&manager), &req));

        let consultant = role(ROLE_CONSULTANT, &[SURVEY_READ_ALL]);
        assert!(!is_authorized(Some(&consultant), &req));
        assert!(is_authorized(
            Some(&consultant),
            &req.clone().or_role(ROLE_CONSULTANT)
        ));
    }

    #[test]
    fn role_name_match_is_exact() {
        let admin = role("admin", &[]);
        assert!(!is_authorized(Some(&admin), &role_only(ROLE_ADMIN)));
    }

    #[test]
    fn denial_describes_requirement() {
        let p = principal(Some(role(ROLE_MEMBER, &[])));
        let err = p
            .authorize(&Requirement::permission(USER_MANAGE).or_role(ROLE_ADMIN))
            .unwrap_err();
        assert_eq!(
            err.required,
            "permission 'user:manage' or role 'Admin'"
        );
    }

    #[test]
    fn catalogue_contains_seeded_permissions() {
        assert!(is_known_permission(SURVEY_MANAGE));
        assert!(!is_known_permission("survey:delete_everything"));
        assert_eq!(CATALOGUE.len(), 8);
    }

    #[test]
    fn permissions_are_listed_sorted() {
        let p = principal(Some(role("Manager", &[SURVEY_MANAGE, COURSE_MANAGE])));
        assert_eq!(p.permissions(), vec![COURSE_MANAGE, SURVEY_MANAGE]);
        assert!(principal(None).permissions().is_empty());
    }
}
