use anyhow::Error;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnProfile,
    EditOwnProfile,
    EnrollInCourses,
    TrackOwnProgress,
    ViewOwnCertificates,
    ViewOwnNotifications,
    InitiatePayments,

    ManageOwnCourses,
    PublishOwnCourses,
    ViewCourseEnrollments,
    ScheduleLiveSessions,
    UploadLessonResources,

    ManageUsers,
    PromoteUsers,
    OverrideCourseStatus,
    ViewAllPayments,
    SendNotifications,
    BulkIssueCertificates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Instructor,
    Admin,
}

static STUDENT_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnProfile);
    permissions.insert(Permission::EditOwnProfile);
    permissions.insert(Permission::EnrollInCourses);
    permissions.insert(Permission::TrackOwnProgress);
    permissions.insert(Permission::ViewOwnCertificates);
    permissions.insert(Permission::ViewOwnNotifications);
    permissions.insert(Permission::InitiatePayments);

    permissions
});

static INSTRUCTOR_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(STUDENT_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageOwnCourses);
    permissions.insert(Permission::PublishOwnCourses);
    permissions.insert(Permission::ViewCourseEnrollments);
    permissions.insert(Permission::ScheduleLiveSessions);
    permissions.insert(Permission::UploadLessonResources);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(INSTRUCTOR_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageUsers);
    permissions.insert(Permission::PromoteUsers);
    permissions.insert(Permission::OverrideCourseStatus);
    permissions.insert(Permission::ViewAllPayments);
    permissions.insert(Permission::SendNotifications);
    permissions.insert(Permission::BulkIssueCertificates);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Student => &STUDENT_PERMISSIONS,
            Role::Instructor => &INSTRUCTOR_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Student, Role::Instructor, Role::Admin] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
        assert!(Role::from_str("superuser").is_err());
    }

    #[test]
    fn test_permission_sets_are_nested() {
        for permission in STUDENT_PERMISSIONS.iter() {
            assert!(Role::Instructor.has_permission(*permission));
            assert!(Role::Admin.has_permission(*permission));
        }
        for permission in INSTRUCTOR_PERMISSIONS.iter() {
            assert!(Role::Admin.has_permission(*permission));
        }
    }

    #[test]
    fn test_students_cannot_manage_courses_or_users() {
        assert!(!Role::Student.has_permission(Permission::ManageOwnCourses));
        assert!(!Role::Student.has_permission(Permission::ManageUsers));
        assert!(!Role::Instructor.has_permission(Permission::ManageUsers));
        assert!(!Role::Instructor.has_permission(Permission::PromoteUsers));
    }
}
