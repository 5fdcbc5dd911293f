use crate::error::{LedgerError, LedgerResult};
use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Staff,
    Hod,
    Management,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "staff" => Some(Self::Staff),
            "hod" => Some(Self::Hod),
            "management" => Some(Self::Management),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Staff => "staff",
            Self::Hod => "hod",
            Self::Management => "management",
        }
    }

    /// HODs teach too, so staff-level operations accept both.
    pub fn is_teaching(self) -> bool {
        matches!(self, Self::Staff | Self::Hod)
    }
}

/// The authenticated user on whose behalf an operation runs, with the
/// profile row that goes with its role.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
    pub profile_id: Option<String>,
    pub department_id: Option<String>,
    pub display_name: String,
}

pub fn resolve_caller(conn: &Connection, user_id: &str) -> LedgerResult<Caller> {
    let row: Option<(String, i64, String)> = conn
        .query_row(
            "SELECT role, is_active, username FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((role_raw, active, username)) = row else {
        return Err(LedgerError::NotFound { entity: "user" });
    };
    if active == 0 {
        return Err(LedgerError::forbidden("account is inactive"));
    }
    let role = Role::parse(&role_raw)
        .ok_or_else(|| LedgerError::forbidden(format!("unknown role: {}", role_raw)))?;

    let profile: Option<(String, Option<String>, String)> = match role {
        Role::Student => conn
            .query_row(
                "SELECT id, department_id, name FROM students WHERE user_id = ?",
                [user_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?,
        Role::Staff | Role::Hod => conn
            .query_row(
                "SELECT id, department_id, name FROM staff WHERE user_id = ?",
                [user_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?,
        Role::Management => conn
            .query_row(
                "SELECT id, NULL, name FROM management WHERE user_id = ?",
                [user_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?,
    };

    Ok(match profile {
        Some((pid, dept, name)) => Caller {
            user_id: user_id.to_string(),
            role,
            profile_id: Some(pid),
            department_id: dept,
            display_name: name,
        },
        None => Caller {
            user_id: user_id.to_string(),
            role,
            profile_id: None,
            department_id: None,
            display_name: username,
        },
    })
}

impl Caller {
    pub fn require_any(&self, allowed: &[Role], action: &str) -> LedgerResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(LedgerError::forbidden(format!(
                "{} may not {}",
                self.role.as_str(),
                action
            )))
        }
    }

    fn profile(&self) -> LedgerResult<&str> {
        self.profile_id
            .as_deref()
            .ok_or_else(|| LedgerError::forbidden("caller has no profile record"))
    }

    /// Student profile id of a student caller.
    pub fn student_id(&self) -> LedgerResult<&str> {
        self.require_any(&[Role::Student], "use student-only operations")?;
        self.profile()
    }

    /// Staff profile id of a staff or HOD caller.
    pub fn staff_id(&self) -> LedgerResult<&str> {
        self.require_any(&[Role::Staff, Role::Hod], "use staff-only operations")?;
        self.profile()
    }

    pub fn management_id(&self) -> LedgerResult<&str> {
        self.require_any(&[Role::Management], "use management-only operations")?;
        self.profile()
    }

    pub fn require_management(&self, action: &str) -> LedgerResult<()> {
        self.require_any(&[Role::Management], action)
    }

    /// Management acts everywhere; a HOD only inside its own department.
    pub fn require_department_admin(&self, department_id: &str, action: &str) -> LedgerResult<()> {
        match self.role {
            Role::Management => Ok(()),
            Role::Hod if self.department_id.as_deref() == Some(department_id) => Ok(()),
            Role::Hod => Err(LedgerError::forbidden(format!(
                "{} is limited to your own department",
                action
            ))),
            _ => Err(LedgerError::forbidden(format!(
                "{} may not {}",
                self.role.as_str(),
                action
            ))),
        }
    }

    /// Ownership predicate for staff-created records (sessions, exams).
    pub fn require_owner(&self, owner_staff_id: &str, action: &str) -> LedgerResult<()> {
        let staff_id = self.staff_id()?;
        if staff_id == owner_staff_id {
            Ok(())
        } else {
            Err(LedgerError::forbidden(format!(
                "only the creator may {}",
                action
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role, dept: Option<&str>) -> Caller {
        Caller {
            user_id: "u".into(),
            role,
            profile_id: Some("p".into()),
            department_id: dept.map(|d| d.to_string()),
            display_name: "Test".into(),
        }
    }

    #[test]
    fn hod_is_scoped_to_own_department() {
        let hod = caller(Role::Hod, Some("cse"));
        assert!(hod.require_department_admin("cse", "edit subjects").is_ok());
        let e = hod
            .require_department_admin("ece", "edit subjects")
            .expect_err("other department");
        assert_eq!(e.code(), "forbidden");
        assert!(caller(Role::Management, None)
            .require_department_admin("ece", "edit subjects")
            .is_ok());
        assert!(caller(Role::Staff, Some("cse"))
            .require_department_admin("cse", "edit subjects")
            .is_err());
    }

    #[test]
    fn owner_check_compares_staff_profile() {
        let staff = caller(Role::Staff, Some("cse"));
        assert!(staff.require_owner("p", "enter marks").is_ok());
        assert!(staff.require_owner("q", "enter marks").is_err());
        assert!(caller(Role::Student, None)
            .require_owner("p", "enter marks")
            .is_err());
    }

    #[test]
    fn profile_accessors_enforce_role() {
        assert!(caller(Role::Student, None).student_id().is_ok());
        assert!(caller(Role::Student, None).staff_id().is_err());
        assert!(caller(Role::Hod, None).staff_id().is_ok());
        assert!(caller(Role::Management, None).management_id().is_ok());
    }
}
