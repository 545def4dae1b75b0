use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Superadmin,
    Admin,
    Marketing,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ManageCatalog,
    ManageMedia,
    ManageDiscounts,
    ManageOrders,
    ModerateReviews,
    ViewStats,
    ManageUsers,
    ManageRoles,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Superadmin, Role::Admin, Role::Marketing, Role::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::Admin => "admin",
            Role::Marketing => "marketing",
            Role::Client => "client",
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        use Permission::*;

        match self {
            Role::Superadmin => true,
            Role::Admin => permission != ManageRoles,
            Role::Marketing => matches!(
                permission,
                ManageMedia | ManageDiscounts | ModerateReviews | ViewStats
            ),
            Role::Client => false,
        }
    }

    /// Whether the role may enter the back-office at all.
    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Client)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "superadmin" => Ok(Role::Superadmin),
            "admin" => Ok(Role::Admin),
            "marketing" => Ok(Role::Marketing),
            "client" => Ok(Role::Client),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superadmin_is_the_only_role_manager() {
        for role in Role::ALL {
            assert_eq!(role.allows(Permission::ManageRoles), role == Role::Superadmin);
        }
    }

    #[test]
    fn marketing_is_limited_to_promotion_work() {
        let marketing = Role::Marketing;
        assert!(marketing.allows(Permission::ManageDiscounts));
        assert!(marketing.allows(Permission::ViewStats));
        assert!(marketing.allows(Permission::ModerateReviews));
        assert!(!marketing.allows(Permission::ManageOrders));
        assert!(!marketing.allows(Permission::ManageCatalog));
        assert!(!marketing.allows(Permission::ManageUsers));
    }

    #[test]
    fn client_has_no_back_office_access() {
        assert!(!Role::Client.is_staff());
        assert!(!Role::Client.allows(Permission::ViewStats));
        assert!(Role::Admin.is_staff());
        assert!(Role::Admin.allows(Permission::ManageUsers));
    }

    #[test]
    fn parses_allow_list_only() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        let err = "owner".parse::<Role>().unwrap_err();
        assert_eq!(err.to_string(), "unknown role `owner`");
    }
}
