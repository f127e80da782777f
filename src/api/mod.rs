pub mod admin;
pub mod auth;
pub mod certificates;
pub mod courses;
pub mod files;
pub mod live_sessions;
pub mod notifications;
pub mod payments;
pub mod users;

use chrono::{DateTime, Utc};
use rocket::FromForm;
use serde::{Deserialize, Serialize};

use crate::auth::User;
use crate::error::AppError;

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(FromForm, Debug)]
pub struct PageParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageParams {
    /// Resolves to (page, per_page, offset), rejecting out-of-range values.
    pub fn resolve(&self) -> Result<(i64, i64, i64), AppError> {
        let page = self.page.unwrap_or(1);
        let per_page = self.per_page.unwrap_or(DEFAULT_PER_PAGE);

        if page < 1 {
            return Err(AppError::Validation(
                "Page must be greater than 0".to_string(),
            ));
        }

        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(AppError::Validation(format!(
                "Per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }

        Ok((page, per_page, (page - 1) * per_page))
    }
}

#[derive(Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64, total: i64) -> Self {
        let pages = if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        };

        Self {
            page,
            per_page,
            total,
            pages,
            has_next: page < pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role.to_string(),
            is_active: user.is_active,
            email_verified: user.email_verified,
            phone: user.phone,
            bio: user.bio,
            profile_picture: user.profile_picture,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_params_defaults() {
        let params = PageParams {
            page: None,
            per_page: None,
        };
        assert_eq!(params.resolve().unwrap(), (1, DEFAULT_PER_PAGE, 0));
    }

    #[test]
    fn test_page_params_offset() {
        let params = PageParams {
            page: Some(3),
            per_page: Some(10),
        };
        assert_eq!(params.resolve().unwrap(), (3, 10, 20));
    }

    #[test]
    fn test_page_params_rejects_out_of_range() {
        assert!(
            PageParams {
                page: Some(0),
                per_page: None
            }
            .resolve()
            .is_err()
        );
        assert!(
            PageParams {
                page: None,
                per_page: Some(101)
            }
            .resolve()
            .is_err()
        );
    }

    #[test]
    fn test_pagination_math() {
        let pagination = Pagination::new(2, 10, 25);
        assert_eq!(pagination.pages, 3);
        assert!(pagination.has_next);
        assert!(pagination.has_prev);

        let empty = Pagination::new(1, 10, 0);
        assert_eq!(empty.pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }
}
