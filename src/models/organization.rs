use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A hospital. Every other record is owned by exactly one hospital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospital {
    pub id: i64,
    pub name: String,
    pub grade: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHospital {
    pub name: String,
    pub grade: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentAttri {
    Clinical,
    MedicalTech,
    Administrative,
    Logistics,
    #[default]
    Other,
}

impl DepartmentAttri {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clinical => "clinical",
            Self::MedicalTech => "medical_tech",
            Self::Administrative => "administrative",
            Self::Logistics => "logistics",
            Self::Other => "other",
        }
    }
}

impl FromStr for DepartmentAttri {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clinical" => Ok(Self::Clinical),
            "medical_tech" => Ok(Self::MedicalTech),
            "administrative" => Ok(Self::Administrative),
            "logistics" => Ok(Self::Logistics),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid department attribute: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub id: i64,
    pub hospital_id: i64,
    pub name: String,
    pub contact: Option<String>,
    pub attri: DepartmentAttri,
    pub desc: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepartmentInput {
    pub name: String,
    pub contact: Option<String>,
    #[serde(default)]
    pub attri: DepartmentAttri,
    #[serde(default)]
    pub desc: String,
}

/// Capabilities granted to a staff member on top of the baseline
/// (submitting repair orders and project plans).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    AssetManager,
    ProjectDispatcher,
    RepairDispatcher,
    Maintainer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::AssetManager => "asset_manager",
            Self::ProjectDispatcher => "project_dispatcher",
            Self::RepairDispatcher => "repair_dispatcher",
            Self::Maintainer => "maintainer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "asset_manager" => Ok(Self::AssetManager),
            "project_dispatcher" => Ok(Self::ProjectDispatcher),
            "repair_dispatcher" => Ok(Self::RepairDispatcher),
            "maintainer" => Ok(Self::Maintainer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// An employee. `account_id`, `username` and `is_active` come from the
/// login account the staff row is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub id: i64,
    pub hospital_id: i64,
    pub department_id: Option<i64>,
    pub account_id: i64,
    pub username: String,
    pub name: String,
    pub title: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub is_active: bool,
    pub created_at: String,
}

impl Staff {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(*r))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStaff {
    pub username: String,
    pub name: String,
    pub department_id: Option<i64>,
    pub title: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaffUpdate {
    pub name: Option<String>,
    pub department_id: Option<i64>,
    pub title: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<Role>>,
}
