use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::{Db, parse_column};
use crate::errors::{AdminError, require};
use crate::models::{
    Department, DepartmentInput, Hospital, NewHospital, NewStaff, Role, Staff, StaffUpdate,
};
use crate::permissions::{self, ensure, ensure_same_hospital};
use crate::validation::{optional_email, optional_phone, optional_text, required_text};

const STAFF_SELECT: &str = "SELECT s.id, s.hospital_id, s.department_id, s.account_id, a.username, s.name,
        s.title, s.contact, s.email, s.roles, a.is_active, s.created_at
     FROM staff s JOIN accounts a ON a.id = s.account_id";

const DEPARTMENT_SELECT: &str =
    "SELECT id, hospital_id, name, contact, attri, desc, created_at FROM departments";

/// Intermediate row struct for staff joined with their account.
struct StaffRow {
    id: i64,
    hospital_id: i64,
    department_id: Option<i64>,
    account_id: i64,
    username: String,
    name: String,
    title: Option<String>,
    contact: Option<String>,
    email: Option<String>,
    roles: String,
    is_active: bool,
    created_at: String,
}

impl StaffRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hospital_id: row.get(1)?,
            department_id: row.get(2)?,
            account_id: row.get(3)?,
            username: row.get(4)?,
            name: row.get(5)?,
            title: row.get(6)?,
            contact: row.get(7)?,
            email: row.get(8)?,
            roles: row.get(9)?,
            is_active: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_staff(self) -> Result<Staff> {
        let roles: Vec<Role> =
            serde_json::from_str(&self.roles).context("Failed to parse staff roles JSON")?;
        Ok(Staff {
            id: self.id,
            hospital_id: self.hospital_id,
            department_id: self.department_id,
            account_id: self.account_id,
            username: self.username,
            name: self.name,
            title: self.title,
            contact: self.contact,
            email: self.email,
            roles,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

fn department_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Department, String)> {
    let attri: String = row.get(4)?;
    Ok((
        Department {
            id: row.get(0)?,
            hospital_id: row.get(1)?,
            name: row.get(2)?,
            contact: row.get(3)?,
            attri: Default::default(),
            desc: row.get(5)?,
            created_at: row.get(6)?,
        },
        attri,
    ))
}

fn finish_department((mut dept, attri): (Department, String)) -> Result<Department> {
    dept.attri = parse_column(&attri, "department attri")?;
    Ok(dept)
}

pub(crate) fn fetch_hospital(conn: &Connection, id: i64) -> Result<Option<Hospital>> {
    conn.query_row(
        "SELECT id, name, grade, address, contact, created_at FROM hospitals WHERE id = ?1",
        params![id],
        |row| {
            Ok(Hospital {
                id: row.get(0)?,
                name: row.get(1)?,
                grade: row.get(2)?,
                address: row.get(3)?,
                contact: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .optional()
    .context("Failed to query hospital")
}

pub(crate) fn fetch_department(conn: &Connection, id: i64) -> Result<Option<Department>> {
    let row = conn
        .query_row(
            &format!("{} WHERE id = ?1", DEPARTMENT_SELECT),
            params![id],
            department_from_row,
        )
        .optional()
        .context("Failed to query department")?;
    row.map(finish_department).transpose()
}

pub(crate) fn fetch_staff(conn: &Connection, id: i64) -> Result<Option<Staff>> {
    let row = conn
        .query_row(
            &format!("{} WHERE s.id = ?1", STAFF_SELECT),
            params![id],
            StaffRow::from_row,
        )
        .optional()
        .context("Failed to query staff")?;
    row.map(StaffRow::into_staff).transpose()
}

/// An active staff member of `hospital_id`, or a validation error naming
/// the `field` that referenced them.
pub(crate) fn require_colleague(
    conn: &Connection,
    hospital_id: i64,
    staff_id: i64,
    field: &str,
) -> Result<Staff> {
    let staff = require(fetch_staff(conn, staff_id)?, "Staff", staff_id)?;
    if staff.hospital_id != hospital_id {
        return Err(AdminError::validation(format!(
            "{} {} belongs to another hospital",
            field, staff_id
        ))
        .into());
    }
    if !staff.is_active {
        return Err(AdminError::validation(format!("{} {} is disabled", field, staff_id)).into());
    }
    Ok(staff)
}

/// Department must exist and sit in `hospital_id`.
pub(crate) fn check_department(
    conn: &Connection,
    hospital_id: i64,
    department_id: Option<i64>,
) -> Result<()> {
    if let Some(id) = department_id {
        let dept = require(fetch_department(conn, id)?, "Department", id)?;
        if dept.hospital_id != hospital_id {
            return Err(AdminError::validation(format!(
                "Department {} belongs to another hospital",
                id
            ))
            .into());
        }
    }
    Ok(())
}

fn unique_roles(roles: &[Role]) -> Vec<Role> {
    let mut seen = std::collections::HashSet::new();
    roles.iter().copied().filter(|r| seen.insert(*r)).collect()
}

fn ensure_admin_of(actor: &Staff, hospital_id: i64) -> Result<(), AdminError> {
    ensure_same_hospital(actor, hospital_id)?;
    ensure(permissions::is_admin(actor), "admin role required")
}

impl Db {
    // ── Hospitals ─────────────────────────────────────────────────────

    pub fn create_hospital(&self, input: &NewHospital) -> Result<Hospital> {
        let name = required_text("name", &input.name)?;
        let contact = optional_phone(input.contact.as_deref())?;

        let exists: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM hospitals WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )
            .context("Failed to check hospital name")?;
        if exists {
            return Err(AdminError::conflict(format!("Hospital '{}' already exists", name)).into());
        }

        self.conn
            .execute(
                "INSERT INTO hospitals (name, grade, address, contact) VALUES (?1, ?2, ?3, ?4)",
                params![
                    name,
                    optional_text(input.grade.as_deref()),
                    optional_text(input.address.as_deref()),
                    contact
                ],
            )
            .context("Failed to insert hospital")?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(hospital_id = id, %name, "hospital created");
        self.get_hospital(id)?
            .context("Hospital not found after insert")
    }

    pub fn list_hospitals(&self) -> Result<Vec<Hospital>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, grade, address, contact, created_at FROM hospitals ORDER BY id")
            .context("Failed to prepare list_hospitals")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Hospital {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    grade: row.get(2)?,
                    address: row.get(3)?,
                    contact: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .context("Failed to query hospitals")?;
        let mut hospitals = Vec::new();
        for row in rows {
            hospitals.push(row.context("Failed to read hospital row")?);
        }
        Ok(hospitals)
    }

    pub fn get_hospital(&self, id: i64) -> Result<Option<Hospital>> {
        fetch_hospital(&self.conn, id)
    }

    // ── Departments ───────────────────────────────────────────────────

    pub fn create_department(
        &self,
        actor: &Staff,
        hospital_id: i64,
        input: &DepartmentInput,
    ) -> Result<Department> {
        require(self.get_hospital(hospital_id)?, "Hospital", hospital_id)?;
        ensure_admin_of(actor, hospital_id)?;
        let name = required_text("name", &input.name)?;
        let contact = optional_phone(input.contact.as_deref())?;
        self.ensure_department_name_free(hospital_id, &name, None)?;

        self.conn
            .execute(
                "INSERT INTO departments (hospital_id, name, contact, attri, desc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    hospital_id,
                    name,
                    contact,
                    input.attri.as_str(),
                    input.desc.trim()
                ],
            )
            .context("Failed to insert department")?;
        let id = self.conn.last_insert_rowid();
        self.get_department(id)?
            .context("Department not found after insert")
    }

    pub fn list_departments(&self, hospital_id: i64) -> Result<Vec<Department>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE hospital_id = ?1 ORDER BY id",
                DEPARTMENT_SELECT
            ))
            .context("Failed to prepare list_departments")?;
        let rows = stmt
            .query_map(params![hospital_id], department_from_row)
            .context("Failed to query departments")?;
        let mut departments = Vec::new();
        for row in rows {
            departments.push(finish_department(
                row.context("Failed to read department row")?,
            )?);
        }
        Ok(departments)
    }

    pub fn get_department(&self, id: i64) -> Result<Option<Department>> {
        fetch_department(&self.conn, id)
    }

    pub fn update_department(
        &self,
        actor: &Staff,
        id: i64,
        input: &DepartmentInput,
    ) -> Result<Department> {
        let dept = require(self.get_department(id)?, "Department", id)?;
        ensure_admin_of(actor, dept.hospital_id)?;
        let name = required_text("name", &input.name)?;
        let contact = optional_phone(input.contact.as_deref())?;
        self.ensure_department_name_free(dept.hospital_id, &name, Some(id))?;

        self.conn
            .execute(
                "UPDATE departments SET name = ?1, contact = ?2, attri = ?3, desc = ?4 WHERE id = ?5",
                params![name, contact, input.attri.as_str(), input.desc.trim(), id],
            )
            .context("Failed to update department")?;
        self.get_department(id)?
            .context("Department not found after update")
    }

    fn ensure_department_name_free(
        &self,
        hospital_id: i64,
        name: &str,
        except: Option<i64>,
    ) -> Result<()> {
        let taken: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM departments
                 WHERE hospital_id = ?1 AND name = ?2 AND id != COALESCE(?3, -1))",
                params![hospital_id, name, except],
                |row| row.get(0),
            )
            .context("Failed to check department name")?;
        if taken {
            return Err(
                AdminError::conflict(format!("Department '{}' already exists", name)).into(),
            );
        }
        Ok(())
    }

    // ── Staff ─────────────────────────────────────────────────────────

    /// Create an account and its staff row.
    ///
    /// The first staff member of a hospital needs no actor and is always
    /// granted `admin`. After that only the hospital's admins may add staff.
    pub fn create_staff(
        &self,
        actor: Option<&Staff>,
        hospital_id: i64,
        input: &NewStaff,
    ) -> Result<Staff> {
        require(self.get_hospital(hospital_id)?, "Hospital", hospital_id)?;
        let username = required_text("username", &input.username)?;
        let name = required_text("name", &input.name)?;
        let contact = optional_phone(input.contact.as_deref())?;
        let email = optional_email(input.email.as_deref())?;
        let mut roles = unique_roles(&input.roles);

        let tx = self.immediate()?;

        let headcount: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM staff WHERE hospital_id = ?1",
                params![hospital_id],
                |row| row.get(0),
            )
            .context("Failed to count staff")?;
        if headcount == 0 {
            if !roles.contains(&Role::Admin) {
                roles.insert(0, Role::Admin);
            }
        } else {
            let actor = actor.ok_or(AdminError::Unauthorized)?;
            ensure_admin_of(actor, hospital_id)?;
        }

        check_department(&tx, hospital_id, input.department_id)?;

        let taken: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM accounts WHERE username = ?1)",
                params![username],
                |row| row.get(0),
            )
            .context("Failed to check username")?;
        if taken {
            return Err(
                AdminError::conflict(format!("Username '{}' is already taken", username)).into(),
            );
        }

        tx.execute(
            "INSERT INTO accounts (username) VALUES (?1)",
            params![username],
        )
        .context("Failed to insert account")?;
        let account_id = tx.last_insert_rowid();

        let roles_json = serde_json::to_string(&roles).context("Failed to serialize roles")?;
        tx.execute(
            "INSERT INTO staff (hospital_id, department_id, account_id, name, title, contact, email, roles)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                hospital_id,
                input.department_id,
                account_id,
                name,
                optional_text(input.title.as_deref()),
                contact,
                email,
                roles_json
            ],
        )
        .context("Failed to insert staff")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit staff creation")?;

        tracing::info!(staff_id = id, hospital_id, %username, bootstrap = headcount == 0, "staff created");
        self.get_staff(id)?.context("Staff not found after insert")
    }

    pub fn list_staff(&self, hospital_id: i64, department_id: Option<i64>) -> Result<Vec<Staff>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE s.hospital_id = ?1 AND (?2 IS NULL OR s.department_id = ?2) ORDER BY s.id",
                STAFF_SELECT
            ))
            .context("Failed to prepare list_staff")?;
        let rows = stmt
            .query_map(params![hospital_id, department_id], StaffRow::from_row)
            .context("Failed to query staff")?;
        let mut staff = Vec::new();
        for row in rows {
            let r = row.context("Failed to read staff row")?;
            staff.push(r.into_staff()?);
        }
        Ok(staff)
    }

    pub fn get_staff(&self, id: i64) -> Result<Option<Staff>> {
        fetch_staff(&self.conn, id)
    }

    /// Staff members may edit their own profile; department and roles are
    /// admin-only.
    pub fn update_staff(&self, actor: &Staff, id: i64, input: &StaffUpdate) -> Result<Staff> {
        let staff = require(self.get_staff(id)?, "Staff", id)?;
        ensure_same_hospital(actor, staff.hospital_id)?;
        let admin = permissions::is_admin(actor);
        ensure(admin || actor.id == id, "only admins may edit other staff")?;
        if !admin && (input.roles.is_some() || input.department_id.is_some()) {
            return Err(AdminError::forbidden("only admins may change department or roles").into());
        }

        let name = match &input.name {
            Some(n) => required_text("name", n)?,
            None => staff.name.clone(),
        };
        let title = match &input.title {
            Some(t) => optional_text(Some(t.as_str())),
            None => staff.title.clone(),
        };
        let contact = match &input.contact {
            Some(c) => optional_phone(Some(c.as_str()))?,
            None => staff.contact.clone(),
        };
        let email = match &input.email {
            Some(e) => optional_email(Some(e.as_str()))?,
            None => staff.email.clone(),
        };
        let department_id = input.department_id.or(staff.department_id);
        check_department(&self.conn, staff.hospital_id, department_id)?;
        let roles = unique_roles(input.roles.as_deref().unwrap_or(&staff.roles));
        if actor.id == id && staff.has_role(Role::Admin) && !roles.contains(&Role::Admin) {
            return Err(AdminError::validation("admins cannot remove their own admin role").into());
        }
        let roles_json = serde_json::to_string(&roles).context("Failed to serialize roles")?;

        self.conn
            .execute(
                "UPDATE staff SET name = ?1, title = ?2, contact = ?3, email = ?4,
                 department_id = ?5, roles = ?6 WHERE id = ?7",
                params![name, title, contact, email, department_id, roles_json, id],
            )
            .context("Failed to update staff")?;
        self.get_staff(id)?.context("Staff not found after update")
    }

    /// Enable or disable the staff member's account.
    pub fn set_staff_active(&self, actor: &Staff, id: i64, active: bool) -> Result<Staff> {
        let staff = require(self.get_staff(id)?, "Staff", id)?;
        ensure_admin_of(actor, staff.hospital_id)?;
        if actor.id == id && !active {
            return Err(AdminError::validation("staff cannot disable themselves").into());
        }
        self.conn
            .execute(
                "UPDATE accounts SET is_active = ?1 WHERE id = ?2",
                params![active, staff.account_id],
            )
            .context("Failed to update account status")?;
        tracing::info!(staff_id = id, active, "staff account status changed");
        self.get_staff(id)?.context("Staff not found after update")
    }

    /// Resolve the acting staff member. Unknown or disabled staff cannot act.
    pub fn find_actor(&self, id: i64) -> Result<Staff> {
        match self.get_staff(id)? {
            Some(staff) if staff.is_active => Ok(staff),
            _ => Err(AdminError::Unauthorized.into()),
        }
    }
}
