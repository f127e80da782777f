use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::error::AppError;

use super::{Permission, Role};

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: Role::from_str(&user.role).unwrap_or_default(),
            is_active: user.is_active,
            email_verified: user.email_verified,
            phone: user.phone,
            bio: user.bio,
            profile_picture: user.profile_picture,
            created_at: DateTime::<Utc>::from_naive_utc_and_offset(user.created_at, Utc),
            updated_at: DateTime::<Utc>::from_naive_utc_and_offset(user.updated_at, Utc),
        }
    }
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                email = %self.email,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "{} role cannot perform this action",
                self.role
            )))
        }
    }

    /// The one ownership check. Admins pass unconditionally; everyone else
    /// must be the owning identity. Used for instructor-scoped operations on
    /// course-family entities, where denial is an explicit 403.
    pub fn require_owner_or_admin(&self, owner_id: i64) -> Result<(), AppError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Instructor | Role::Student => {
                if self.id == owner_id {
                    Ok(())
                } else {
                    tracing::warn!(
                        email = %self.email,
                        role = %self.role.as_str(),
                        owner_id = %owner_id,
                        "Ownership check failed"
                    );
                    Err(AppError::Authorization(
                        "You do not own this resource".to_string(),
                    ))
                }
            }
        }
    }

    /// Existence-concealing variant for self-scoped lookups by id (payments,
    /// notifications, certificates fetched as "mine"): a row owned by someone
    /// else answers the same way as a row that does not exist.
    pub fn conceal_unless_owner_or_admin(
        &self,
        owner_id: i64,
        what: &str,
    ) -> Result<(), AppError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Instructor | Role::Student => {
                if self.id == owner_id {
                    Ok(())
                } else {
                    Err(AppError::NotFound(format!("{} not found", what)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user_with_role(id: i64, role: Role) -> User {
        User {
            id,
            email: format!("user{}@example.com", id),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            role,
            is_active: true,
            email_verified: true,
            phone: None,
            bio: None,
            profile_picture: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_admin_passes_any_ownership_check() {
        let admin = user_with_role(1, Role::Admin);
        assert!(admin.require_owner_or_admin(42).is_ok());
        assert!(admin.conceal_unless_owner_or_admin(42, "payment").is_ok());
    }

    #[test]
    fn test_instructor_owns_only_their_entities() {
        let instructor = user_with_role(7, Role::Instructor);
        assert!(instructor.require_owner_or_admin(7).is_ok());

        let denied = instructor.require_owner_or_admin(8).unwrap_err();
        assert!(matches!(denied, AppError::Authorization(_)));
    }

    #[test]
    fn test_concealing_check_reports_not_found() {
        let student = user_with_role(3, Role::Student);
        let denied = student
            .conceal_unless_owner_or_admin(4, "payment")
            .unwrap_err();
        assert!(matches!(denied, AppError::NotFound(_)));
    }
}
