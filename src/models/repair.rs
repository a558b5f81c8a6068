use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepairPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl RepairPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl FromStr for RepairPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid repair priority: {}", s)),
        }
    }
}

/// Lifecycle of a repair order.
///
/// ```text
/// submitted -> dispatched -> done -> closed
///     |            |  ^
///     |            +--+ (re-dispatch)
///     +------------+-> cancelled
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Submitted,
    Dispatched,
    Done,
    Closed,
    Cancelled,
}

impl RepairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Dispatched => "dispatched",
            Self::Done => "done",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    /// An open order keeps its asset in `repairing`.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Submitted | Self::Dispatched)
    }

    pub fn can_transition_to(&self, next: RepairStatus) -> bool {
        use RepairStatus::*;
        matches!(
            (self, next),
            (Submitted, Dispatched)
                | (Dispatched, Dispatched)
                | (Dispatched, Done)
                | (Done, Closed)
                | (Submitted, Cancelled)
                | (Dispatched, Cancelled)
        )
    }

    pub const ALL: [RepairStatus; 5] = [
        RepairStatus::Submitted,
        RepairStatus::Dispatched,
        RepairStatus::Done,
        RepairStatus::Closed,
        RepairStatus::Cancelled,
    ];
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "dispatched" => Ok(Self::Dispatched),
            "done" => Ok(Self::Done),
            "closed" => Ok(Self::Closed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid repair status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    Create,
    Dispatch,
    Complete,
    Close,
    Cancel,
}

impl RepairAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Dispatch => "dispatch",
            Self::Complete => "complete",
            Self::Close => "close",
            Self::Cancel => "cancel",
        }
    }
}

impl FromStr for RepairAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "dispatch" => Ok(Self::Dispatch),
            "complete" => Ok(Self::Complete),
            "close" => Ok(Self::Close),
            "cancel" => Ok(Self::Cancel),
            _ => Err(format!("Invalid repair action: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultType {
    pub id: i64,
    pub hospital_id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub desc: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFaultType {
    pub title: String,
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOrder {
    pub id: i64,
    pub hospital_id: i64,
    pub order_no: String,
    pub asset_id: i64,
    pub applicant_id: i64,
    pub fault_type_id: Option<i64>,
    pub priority: RepairPriority,
    pub desc: String,
    pub status: RepairStatus,
    pub maintainer_id: Option<i64>,
    pub result: Option<String>,
    pub solution: Option<String>,
    pub expenses: Option<f64>,
    pub rating: Option<i32>,
    pub comment: Option<String>,
    pub created_at: String,
    pub dispatched_at: Option<String>,
    pub completed_at: Option<String>,
    pub closed_at: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRepairOrder {
    pub asset_id: i64,
    pub fault_type_id: Option<i64>,
    #[serde(default)]
    pub priority: RepairPriority,
    pub desc: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepairCompletion {
    pub result: String,
    #[serde(default)]
    pub solution: Option<String>,
    #[serde(default)]
    pub expenses: f64,
}

/// One line in an order's append-only operation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOrderRecord {
    pub id: i64,
    pub order_id: i64,
    pub operator_id: i64,
    pub action: RepairAction,
    pub from_status: Option<RepairStatus>,
    pub to_status: RepairStatus,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOrderDetail {
    #[serde(flatten)]
    pub order: RepairOrder,
    pub records: Vec<RepairOrderRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepairOrderFilter {
    pub status: Option<RepairStatus>,
    pub maintainer_id: Option<i64>,
    pub applicant_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepairStats {
    pub hospital_id: i64,
    pub submitted: i64,
    pub dispatched: i64,
    pub done: i64,
    pub closed: i64,
    pub cancelled: i64,
    pub total: i64,
}

impl RepairStats {
    pub fn add(&mut self, status: RepairStatus, count: i64) {
        match status {
            RepairStatus::Submitted => self.submitted += count,
            RepairStatus::Dispatched => self.dispatched += count,
            RepairStatus::Done => self.done += count,
            RepairStatus::Closed => self.closed += count,
            RepairStatus::Cancelled => self.cancelled += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_status_roundtrip() {
        for status in RepairStatus::ALL {
            let parsed: RepairStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("repairing".parse::<RepairStatus>().is_err());
    }

    #[test]
    fn test_repair_transitions() {
        use RepairStatus::*;
        assert!(Submitted.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Done));
        assert!(Done.can_transition_to(Closed));
        assert!(Submitted.can_transition_to(Cancelled));
        assert!(Dispatched.can_transition_to(Cancelled));

        assert!(!Submitted.can_transition_to(Done));
        assert!(!Done.can_transition_to(Cancelled));
        assert!(!Closed.can_transition_to(Dispatched));
        assert!(!Cancelled.can_transition_to(Submitted));
    }

    #[test]
    fn test_open_statuses() {
        assert!(RepairStatus::Submitted.is_open());
        assert!(RepairStatus::Dispatched.is_open());
        assert!(!RepairStatus::Done.is_open());
        assert!(!RepairStatus::Closed.is_open());
        assert!(!RepairStatus::Cancelled.is_open());
    }

    #[test]
    fn test_stats_accumulate_total() {
        let mut stats = RepairStats::default();
        stats.add(RepairStatus::Submitted, 2);
        stats.add(RepairStatus::Closed, 3);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.closed, 3);
        assert_eq!(stats.total, 5);
    }

    #[test]
    fn test_priority_defaults_to_normal() {
        let order: NewRepairOrder =
            serde_json::from_str(r#"{"asset_id": 1, "desc": "no power"}"#).unwrap();
        assert_eq!(order.priority, RepairPriority::Normal);
        assert_eq!("urgent".parse::<RepairPriority>().unwrap(), RepairPriority::Urgent);
    }
}
