use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandingType {
    /// The creator runs the procurement themself.
    SelfService,
    /// A dispatcher assigns a performer.
    #[default]
    Assigned,
}

impl HandingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfService => "self_service",
            Self::Assigned => "assigned",
        }
    }
}

impl FromStr for HandingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self_service" => Ok(Self::SelfService),
            "assigned" => Ok(Self::Assigned),
            _ => Err(format!("Invalid handing type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectCategory {
    #[default]
    Hardware,
    Software,
    Service,
}

impl ProjectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::Software => "software",
            Self::Service => "service",
        }
    }
}

impl FromStr for ProjectCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hardware" => Ok(Self::Hardware),
            "software" => Ok(Self::Software),
            "service" => Ok(Self::Service),
            _ => Err(format!("Invalid project category: {}", s)),
        }
    }
}

/// Lifecycle of a procurement project.
///
/// ```text
/// pending -> started <-> paused
///    |          |
///    |          +-> done
///    +-> overruled
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Pending,
    Started,
    Paused,
    Overruled,
    Done,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Overruled => "overruled",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Overruled | Self::Done)
    }

    /// Started or paused projects hold on to their flow definition.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Started | Self::Paused)
    }

    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Pending, Overruled)
                | (Started, Paused)
                | (Paused, Started)
                | (Started, Done)
        )
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "paused" => Ok(Self::Paused),
            "overruled" => Ok(Self::Overruled),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid project status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneAction {
    Entered,
    Finished,
}

impl MilestoneAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entered => "entered",
            Self::Finished => "finished",
        }
    }
}

impl FromStr for MilestoneAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entered" => Ok(Self::Entered),
            "finished" => Ok(Self::Finished),
            _ => Err(format!("Invalid milestone action: {}", s)),
        }
    }
}

// ── Flow definitions ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFlow {
    pub id: i64,
    pub hospital_id: i64,
    pub title: String,
    pub default_flow: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub id: i64,
    pub flow_id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub index: i32,
    pub desc: String,
}

/// A milestone with its children, for nested API views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneNode {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub children: Vec<MilestoneNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDetail {
    #[serde(flatten)]
    pub flow: ProjectFlow,
    pub milestones: Vec<MilestoneNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMilestone {
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub children: Vec<NewMilestone>,
}

/// A milestone appended to an existing flow. Without `index` it goes after
/// its last sibling.
#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneInput {
    pub title: String,
    #[serde(default)]
    pub desc: String,
    pub parent_id: Option<i64>,
    pub index: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFlow {
    pub title: String,
    #[serde(default)]
    pub default_flow: bool,
    pub milestones: Vec<NewMilestone>,
}

// ── Projects ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPlan {
    pub id: i64,
    pub hospital_id: i64,
    pub title: String,
    pub handing_type: HandingType,
    pub project_cate: ProjectCategory,
    pub purpose: String,
    pub pre_amount: f64,
    pub creator_id: i64,
    pub related_dept_id: Option<i64>,
    pub performer_id: Option<i64>,
    pub assistant_id: Option<i64>,
    pub attached_flow_id: Option<i64>,
    pub current_milestone_id: Option<i64>,
    pub status: ProjectStatus,
    pub overrule_reason: Option<String>,
    pub startup_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDevice {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub type_spec: Option<String>,
    pub num: i32,
    pub measure: Option<String>,
    pub purpose: Option<String>,
    pub planned_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProjectDevice {
    pub name: String,
    pub type_spec: Option<String>,
    pub num: i32,
    pub measure: Option<String>,
    pub purpose: Option<String>,
    #[serde(default)]
    pub planned_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub title: String,
    #[serde(default)]
    pub handing_type: HandingType,
    #[serde(default)]
    pub project_cate: ProjectCategory,
    #[serde(default)]
    pub purpose: String,
    pub related_dept_id: Option<i64>,
    #[serde(default)]
    pub devices: Vec<NewProjectDevice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    pub title: Option<String>,
    pub purpose: Option<String>,
    pub related_dept_id: Option<i64>,
    pub devices: Option<Vec<NewProjectDevice>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDispatch {
    pub performer_id: i64,
    pub assistant_id: Option<i64>,
    /// Falls back to the hospital's default flow.
    pub flow_id: Option<i64>,
}

/// Immutable entry in a project's milestone timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMilestoneRecord {
    pub id: i64,
    pub project_id: i64,
    pub milestone_id: i64,
    pub milestone_title: String,
    pub action: MilestoneAction,
    pub operator_id: i64,
    pub summary: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: ProjectPlan,
    pub devices: Vec<ProjectDevice>,
    pub current_milestone: Option<Milestone>,
    pub records: Vec<ProjectMilestoneRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub performer_id: Option<i64>,
    pub creator_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_status_roundtrip() {
        for s in &["pending", "started", "paused", "overruled", "done"] {
            let parsed: ProjectStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("archived".parse::<ProjectStatus>().is_err());
    }

    #[test]
    fn test_project_transitions() {
        use ProjectStatus::*;
        assert!(Pending.can_transition_to(Started));
        assert!(Pending.can_transition_to(Overruled));
        assert!(Started.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Started));
        assert!(Started.can_transition_to(Done));

        assert!(!Pending.can_transition_to(Done));
        assert!(!Paused.can_transition_to(Done));
        assert!(!Started.can_transition_to(Overruled));
        assert!(!Done.can_transition_to(Started));
        assert!(!Overruled.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_and_in_flight() {
        assert!(ProjectStatus::Done.is_terminal());
        assert!(ProjectStatus::Overruled.is_terminal());
        assert!(!ProjectStatus::Paused.is_terminal());
        assert!(ProjectStatus::Started.is_in_flight());
        assert!(ProjectStatus::Paused.is_in_flight());
        assert!(!ProjectStatus::Pending.is_in_flight());
    }

    #[test]
    fn test_nested_flow_payload() {
        let flow: NewFlow = serde_json::from_str(
            r#"{
                "title": "Standard procurement",
                "milestones": [
                    {"title": "Requirement"},
                    {"title": "Purchase", "children": [{"title": "Tender"}, {"title": "Contract"}]},
                    {"title": "Acceptance"}
                ]
            }"#,
        )
        .unwrap();
        assert!(!flow.default_flow);
        assert_eq!(flow.milestones.len(), 3);
        assert_eq!(flow.milestones[1].children.len(), 2);
        assert!(flow.milestones[0].children.is_empty());
    }

    #[test]
    fn test_serde_produces_snake_case() {
        assert_eq!(
            serde_json::to_string(&HandingType::SelfService).unwrap(),
            "\"self_service\""
        );
        assert_eq!(
            serde_json::to_string(&MilestoneAction::Entered).unwrap(),
            "\"entered\""
        );
        assert_eq!(
            serde_json::from_str::<ProjectCategory>("\"software\"").unwrap(),
            ProjectCategory::Software
        );
    }
}
