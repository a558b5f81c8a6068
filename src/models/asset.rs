use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Using,
    Idle,
    Repairing,
    Scrapped,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Using => "using",
            Self::Idle => "idle",
            Self::Repairing => "repairing",
            Self::Scrapped => "scrapped",
        }
    }

    /// Statuses a manager may set by hand; the others are driven by
    /// repair orders and scrapping.
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Using | Self::Idle)
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "using" => Ok(Self::Using),
            "idle" => Ok(Self::Idle),
            "repairing" => Ok(Self::Repairing),
            "scrapped" => Ok(Self::Scrapped),
            _ => Err(format!("Invalid asset status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDevice {
    pub id: i64,
    pub hospital_id: i64,
    pub department_id: Option<i64>,
    pub asset_no: String,
    pub title: String,
    pub serial_no: Option<String>,
    pub type_spec: Option<String>,
    pub manufacturer: Option<String>,
    pub service_life: Option<i32>,
    pub purchase_date: Option<String>,
    pub storage_place: Option<String>,
    pub responsible_id: Option<i64>,
    pub status: AssetStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAsset {
    /// Minted from the asset sequence when absent.
    pub asset_no: Option<String>,
    pub title: String,
    pub department_id: Option<i64>,
    pub serial_no: Option<String>,
    pub type_spec: Option<String>,
    pub manufacturer: Option<String>,
    pub service_life: Option<i32>,
    pub purchase_date: Option<chrono::NaiveDate>,
    pub storage_place: Option<String>,
    pub responsible_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetUpdate {
    pub title: Option<String>,
    pub department_id: Option<i64>,
    pub serial_no: Option<String>,
    pub type_spec: Option<String>,
    pub manufacturer: Option<String>,
    pub service_life: Option<i32>,
    pub storage_place: Option<String>,
    pub responsible_id: Option<i64>,
    pub status: Option<AssetStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetFilter {
    pub status: Option<AssetStatus>,
    pub department_id: Option<i64>,
}
