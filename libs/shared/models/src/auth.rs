use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Portal roles recognised by the scheduling endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Doctor,
    /// Staff booking on behalf of patients.
    Scholar,
    Admin,
}

impl User {
    pub fn role_kind(&self) -> Option<Role> {
        match self.role.as_deref()? {
            "patient" => Some(Role::Patient),
            "doctor" => Some(Role::Doctor),
            "scholar" => Some(Role::Scholar),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role_kind() == Some(Role::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_role(role: Option<&str>) -> User {
        User {
            id: "u-1".to_string(),
            email: None,
            role: role.map(str::to_string),
            metadata: None,
            created_at: None,
        }
    }

    #[test]
    fn unknown_roles_are_not_mapped() {
        assert_eq!(user_with_role(Some("scholar")).role_kind(), Some(Role::Scholar));
        assert_eq!(user_with_role(Some("authenticated")).role_kind(), None);
        assert_eq!(user_with_role(None).role_kind(), None);
    }
}
