use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::flows::{default_flow_id, fetch_flow, load_tree};
use super::organization::{check_department, require_colleague};
use super::{Db, parse_column};
use crate::errors::{AdminError, require};
use crate::models::{
    HandingType, Milestone, MilestoneAction, NewProject, NewProjectDevice, ProjectCategory,
    ProjectDetail, ProjectDevice, ProjectDispatch, ProjectFilter, ProjectMilestoneRecord,
    ProjectPlan, ProjectStatus, ProjectUpdate, Staff,
};
use crate::permissions::{self, ensure, ensure_same_hospital};
use crate::validation::{non_negative, optional_text, positive, required_text, round_amount};

const PROJECT_SELECT: &str = "SELECT id, hospital_id, title, handing_type, project_cate, purpose, pre_amount,
        creator_id, related_dept_id, performer_id, assistant_id, attached_flow_id,
        current_milestone_id, status, overrule_reason, startup_at, completed_at, created_at,
        updated_at
     FROM project_plans";

/// Intermediate row struct for project_plans.
struct ProjectRow {
    id: i64,
    hospital_id: i64,
    title: String,
    handing_type: String,
    project_cate: String,
    purpose: String,
    pre_amount: f64,
    creator_id: i64,
    related_dept_id: Option<i64>,
    performer_id: Option<i64>,
    assistant_id: Option<i64>,
    attached_flow_id: Option<i64>,
    current_milestone_id: Option<i64>,
    status: String,
    overrule_reason: Option<String>,
    startup_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hospital_id: row.get(1)?,
            title: row.get(2)?,
            handing_type: row.get(3)?,
            project_cate: row.get(4)?,
            purpose: row.get(5)?,
            pre_amount: row.get(6)?,
            creator_id: row.get(7)?,
            related_dept_id: row.get(8)?,
            performer_id: row.get(9)?,
            assistant_id: row.get(10)?,
            attached_flow_id: row.get(11)?,
            current_milestone_id: row.get(12)?,
            status: row.get(13)?,
            overrule_reason: row.get(14)?,
            startup_at: row.get(15)?,
            completed_at: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    fn into_project(self) -> Result<ProjectPlan> {
        Ok(ProjectPlan {
            id: self.id,
            hospital_id: self.hospital_id,
            title: self.title,
            handing_type: parse_column(&self.handing_type, "handing type")?,
            project_cate: parse_column(&self.project_cate, "project category")?,
            purpose: self.purpose,
            pre_amount: self.pre_amount,
            creator_id: self.creator_id,
            related_dept_id: self.related_dept_id,
            performer_id: self.performer_id,
            assistant_id: self.assistant_id,
            attached_flow_id: self.attached_flow_id,
            current_milestone_id: self.current_milestone_id,
            status: parse_column(&self.status, "project status")?,
            overrule_reason: self.overrule_reason,
            startup_at: self.startup_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn fetch_project(conn: &Connection, id: i64) -> Result<Option<ProjectPlan>> {
    let row = conn
        .query_row(
            &format!("{} WHERE id = ?1", PROJECT_SELECT),
            params![id],
            ProjectRow::from_row,
        )
        .optional()
        .context("Failed to query project")?;
    row.map(ProjectRow::into_project).transpose()
}

/// Check the device list and return the estimated total.
fn validate_devices(category: ProjectCategory, devices: &[NewProjectDevice]) -> Result<f64> {
    if category == ProjectCategory::Hardware && devices.is_empty() {
        return Err(AdminError::validation("hardware projects need at least one device").into());
    }
    let mut total = 0.0;
    for device in devices {
        required_text("device name", &device.name)?;
        let num = positive("num", device.num)?;
        let price = non_negative("planned_price", device.planned_price)?;
        total += f64::from(num) * price;
    }
    Ok(round_amount(total))
}

fn replace_devices(conn: &Connection, project_id: i64, devices: &[NewProjectDevice]) -> Result<()> {
    conn.execute(
        "DELETE FROM project_devices WHERE project_id = ?1",
        params![project_id],
    )
    .context("Failed to clear project devices")?;
    let mut stmt = conn
        .prepare(
            "INSERT INTO project_devices (project_id, name, type_spec, num, measure, purpose, planned_price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .context("Failed to prepare device insert")?;
    for device in devices {
        stmt.execute(params![
            project_id,
            device.name.trim(),
            optional_text(device.type_spec.as_deref()),
            device.num,
            optional_text(device.measure.as_deref()),
            optional_text(device.purpose.as_deref()),
            round_amount(device.planned_price)
        ])
        .context("Failed to insert project device")?;
    }
    Ok(())
}

fn append_record(
    conn: &Connection,
    project_id: i64,
    milestone_id: i64,
    action: MilestoneAction,
    operator_id: i64,
    summary: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO project_milestone_records (project_id, milestone_id, action, operator_id, summary)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, milestone_id, action.as_str(), operator_id, summary],
    )
    .context("Failed to insert milestone record")?;
    Ok(())
}

fn set_status(conn: &Connection, id: i64, status: ProjectStatus) -> Result<()> {
    conn.execute(
        "UPDATE project_plans SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![status.as_str(), id],
    )
    .context("Failed to update project status")?;
    Ok(())
}

fn check_transition(project: &ProjectPlan, to: ProjectStatus) -> Result<(), AdminError> {
    if project.status.can_transition_to(to) {
        return Ok(());
    }
    tracing::warn!(
        project_id = project.id,
        from = %project.status,
        to = %to,
        "rejected project transition"
    );
    Err(AdminError::transition("project", project.status, to))
}

/// Milestone moves only happen on started projects.
fn require_started(project: &ProjectPlan) -> Result<(), AdminError> {
    if project.status == ProjectStatus::Started {
        return Ok(());
    }
    Err(AdminError::transition(
        "project",
        project.status,
        "next milestone",
    ))
}

fn ensure_operator(actor: &Staff, project: &ProjectPlan) -> Result<(), AdminError> {
    ensure_same_hospital(actor, project.hospital_id)?;
    ensure(
        permissions::can_operate_project(actor, project),
        "only the performer or assistant may operate this project",
    )
}

fn ensure_dispatcher(actor: &Staff, project: &ProjectPlan) -> Result<(), AdminError> {
    ensure_same_hospital(actor, project.hospital_id)?;
    ensure(
        permissions::can_dispatch_projects(actor),
        "project dispatcher role required",
    )
}

impl Db {
    pub fn create_project(
        &self,
        actor: &Staff,
        hospital_id: i64,
        input: &NewProject,
    ) -> Result<ProjectPlan> {
        ensure_same_hospital(actor, hospital_id)?;
        let title = required_text("title", &input.title)?;
        let pre_amount = validate_devices(input.project_cate, &input.devices)?;

        let tx = self.immediate()?;
        check_department(&tx, hospital_id, input.related_dept_id)?;
        tx.execute(
            "INSERT INTO project_plans (hospital_id, title, handing_type, project_cate, purpose,
                pre_amount, creator_id, related_dept_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                hospital_id,
                title,
                input.handing_type.as_str(),
                input.project_cate.as_str(),
                input.purpose.trim(),
                pre_amount,
                actor.id,
                input.related_dept_id
            ],
        )
        .context("Failed to insert project")?;
        let id = tx.last_insert_rowid();
        replace_devices(&tx, id, &input.devices)?;
        tx.commit().context("Failed to commit project creation")?;

        tracing::info!(
            project_id = id,
            devices = input.devices.len(),
            pre_amount,
            "project created"
        );
        self.get_project(id)?
            .context("Project not found after insert")
    }

    /// Edit a pending project. A supplied device list replaces the old one
    /// and the estimate is recomputed.
    pub fn update_project(&self, actor: &Staff, id: i64, input: &ProjectUpdate) -> Result<ProjectPlan> {
        let tx = self.immediate()?;
        let project = require(fetch_project(&tx, id)?, "Project", id)?;
        ensure_same_hospital(actor, project.hospital_id)?;
        if project.status != ProjectStatus::Pending {
            return Err(AdminError::transition("project", project.status, "edited").into());
        }
        ensure(
            permissions::can_edit_project(actor, &project),
            "only the creator or an admin may edit this project",
        )?;

        let title = match &input.title {
            Some(t) => required_text("title", t)?,
            None => project.title.clone(),
        };
        let purpose = input
            .purpose
            .as_deref()
            .map(|p| p.trim().to_string())
            .unwrap_or_else(|| project.purpose.clone());
        let related_dept_id = input.related_dept_id.or(project.related_dept_id);
        check_department(&tx, project.hospital_id, related_dept_id)?;

        let pre_amount = match &input.devices {
            Some(devices) => {
                let total = validate_devices(project.project_cate, devices)?;
                replace_devices(&tx, id, devices)?;
                total
            }
            None => project.pre_amount,
        };

        tx.execute(
            "UPDATE project_plans SET title = ?1, purpose = ?2, related_dept_id = ?3, pre_amount = ?4,
                updated_at = datetime('now')
             WHERE id = ?5",
            params![title, purpose, related_dept_id, pre_amount, id],
        )
        .context("Failed to update project")?;
        tx.commit().context("Failed to commit project update")?;
        self.get_project(id)?
            .context("Project not found after update")
    }

    /// Assign the performer and flow, then enter the flow's first milestone.
    pub fn dispatch_project(
        &self,
        actor: &Staff,
        id: i64,
        input: &ProjectDispatch,
    ) -> Result<ProjectPlan> {
        let tx = self.immediate()?;
        let project = require(fetch_project(&tx, id)?, "Project", id)?;
        ensure_same_hospital(actor, project.hospital_id)?;
        let self_service = project.handing_type == HandingType::SelfService
            && project.creator_id == actor.id
            && input.performer_id == actor.id;
        ensure(
            permissions::can_dispatch_projects(actor) || self_service,
            "project dispatcher role required",
        )?;
        check_transition(&project, ProjectStatus::Started)?;

        require_colleague(&tx, project.hospital_id, input.performer_id, "performer")?;
        if let Some(assistant) = input.assistant_id {
            if assistant == input.performer_id {
                return Err(AdminError::validation("assistant must differ from performer").into());
            }
            require_colleague(&tx, project.hospital_id, assistant, "assistant")?;
        }

        let flow_id = match input.flow_id {
            Some(flow_id) => flow_id,
            None => default_flow_id(&tx, project.hospital_id)?.ok_or_else(|| {
                AdminError::validation("no flow given and the hospital has no default flow")
            })?,
        };
        let flow = require(fetch_flow(&tx, flow_id)?, "Flow", flow_id)?;
        if flow.hospital_id != project.hospital_id {
            return Err(AdminError::validation(format!(
                "Flow {} belongs to another hospital",
                flow_id
            ))
            .into());
        }
        let tree = load_tree(&tx, flow_id)?;
        let first = tree.first().ok_or_else(|| {
            AdminError::validation(format!("Flow '{}' has no milestones", flow.title))
        })?;

        tx.execute(
            "UPDATE project_plans SET performer_id = ?1, assistant_id = ?2, attached_flow_id = ?3,
                current_milestone_id = ?4, status = 'started', startup_at = datetime('now'),
                updated_at = datetime('now')
             WHERE id = ?5",
            params![input.performer_id, input.assistant_id, flow_id, first.id, id],
        )
        .context("Failed to dispatch project")?;
        append_record(&tx, id, first.id, MilestoneAction::Entered, actor.id, "")?;
        tx.commit().context("Failed to commit project dispatch")?;

        tracing::info!(
            project_id = id,
            performer_id = input.performer_id,
            flow_id,
            milestone = %first.title,
            "project dispatched"
        );
        self.get_project(id)?
            .context("Project not found after dispatch")
    }

    /// Hand a running project to a different performer.
    pub fn redispatch_project(
        &self,
        actor: &Staff,
        id: i64,
        performer_id: i64,
        assistant_id: Option<i64>,
    ) -> Result<ProjectPlan> {
        let tx = self.immediate()?;
        let project = require(fetch_project(&tx, id)?, "Project", id)?;
        ensure_dispatcher(actor, &project)?;
        if !project.status.is_in_flight() {
            return Err(AdminError::transition("project", project.status, "redispatched").into());
        }
        require_colleague(&tx, project.hospital_id, performer_id, "performer")?;
        let assistant_id = assistant_id.or(project.assistant_id);
        if let Some(assistant) = assistant_id {
            if assistant == performer_id {
                return Err(AdminError::validation("assistant must differ from performer").into());
            }
            require_colleague(&tx, project.hospital_id, assistant, "assistant")?;
        }

        tx.execute(
            "UPDATE project_plans SET performer_id = ?1, assistant_id = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![performer_id, assistant_id, id],
        )
        .context("Failed to redispatch project")?;
        tx.commit().context("Failed to commit redispatch")?;

        tracing::info!(
            project_id = id,
            from = ?project.performer_id,
            to = performer_id,
            "project redispatched"
        );
        self.get_project(id)?
            .context("Project not found after redispatch")
    }

    /// Move to the next milestone on the flow's route.
    ///
    /// `target` must be the direct successor of the current milestone: the
    /// route cannot be skipped or walked backwards.
    pub fn change_milestone(
        &self,
        actor: &Staff,
        id: i64,
        target: i64,
        summary: &str,
    ) -> Result<ProjectPlan> {
        let summary = summary.trim();

        let tx = self.immediate()?;
        let project = require(fetch_project(&tx, id)?, "Project", id)?;
        ensure_operator(actor, &project)?;
        require_started(&project)?;
        let flow_id = project
            .attached_flow_id
            .context("Started project has no attached flow")?;
        let current_id = project
            .current_milestone_id
            .context("Started project has no current milestone")?;
        let tree = load_tree(&tx, flow_id)?;

        let Some(target_ms) = tree.get(target) else {
            return Err(AdminError::validation(format!(
                "Milestone {} is not part of flow {}",
                target, flow_id
            ))
            .into());
        };
        let current_title = tree
            .get(current_id)
            .map(|m| m.title.clone())
            .unwrap_or_else(|| current_id.to_string());
        if tree.successor(current_id).map(|m| m.id) != Some(target) {
            tracing::warn!(
                project_id = id,
                from = %current_title,
                to = %target_ms.title,
                "rejected milestone change"
            );
            return Err(AdminError::transition("milestone", current_title, &target_ms.title).into());
        }

        append_record(&tx, id, current_id, MilestoneAction::Finished, actor.id, summary)?;
        append_record(&tx, id, target, MilestoneAction::Entered, actor.id, "")?;
        tx.execute(
            "UPDATE project_plans SET current_milestone_id = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![target, id],
        )
        .context("Failed to move project milestone")?;
        tx.commit().context("Failed to commit milestone change")?;

        tracing::info!(project_id = id, from = %current_title, to = %target_ms.title, "milestone changed");
        self.get_project(id)?
            .context("Project not found after milestone change")
    }

    /// Close the project from its flow's last milestone.
    pub fn finish_project(&self, actor: &Staff, id: i64, summary: &str) -> Result<ProjectPlan> {
        let summary = summary.trim();

        let tx = self.immediate()?;
        let project = require(fetch_project(&tx, id)?, "Project", id)?;
        ensure_operator(actor, &project)?;
        check_transition(&project, ProjectStatus::Done)?;
        let flow_id = project
            .attached_flow_id
            .context("Started project has no attached flow")?;
        let current_id = project
            .current_milestone_id
            .context("Started project has no current milestone")?;
        let tree = load_tree(&tx, flow_id)?;
        if !tree.is_last(current_id) {
            let current_title = tree
                .get(current_id)
                .map(|m| m.title.clone())
                .unwrap_or_else(|| current_id.to_string());
            return Err(AdminError::transition("milestone", current_title, "finish").into());
        }

        append_record(&tx, id, current_id, MilestoneAction::Finished, actor.id, summary)?;
        tx.execute(
            "UPDATE project_plans SET status = 'done', completed_at = datetime('now'),
                updated_at = datetime('now')
             WHERE id = ?1",
            params![id],
        )
        .context("Failed to finish project")?;
        tx.commit().context("Failed to commit project finish")?;

        tracing::info!(project_id = id, "project finished");
        self.get_project(id)?
            .context("Project not found after finish")
    }

    pub fn pause_project(&self, actor: &Staff, id: i64) -> Result<ProjectPlan> {
        self.toggle_pause(actor, id, ProjectStatus::Paused)
    }

    pub fn resume_project(&self, actor: &Staff, id: i64) -> Result<ProjectPlan> {
        self.toggle_pause(actor, id, ProjectStatus::Started)
    }

    fn toggle_pause(&self, actor: &Staff, id: i64, to: ProjectStatus) -> Result<ProjectPlan> {
        let tx = self.immediate()?;
        let project = require(fetch_project(&tx, id)?, "Project", id)?;
        ensure_same_hospital(actor, project.hospital_id)?;
        ensure(
            permissions::can_operate_project(actor, &project)
                || permissions::can_dispatch_projects(actor),
            "only the performer, assistant or a dispatcher may pause or resume",
        )?;
        check_transition(&project, to)?;
        set_status(&tx, id, to)?;
        tx.commit().context("Failed to commit project status")?;

        tracing::info!(project_id = id, from = %project.status, to = %to, "project status changed");
        self.get_project(id)?
            .context("Project not found after status change")
    }

    /// Reject a pending project.
    pub fn overrule_project(&self, actor: &Staff, id: i64, reason: &str) -> Result<ProjectPlan> {
        let reason = required_text("reason", reason)?;

        let tx = self.immediate()?;
        let project = require(fetch_project(&tx, id)?, "Project", id)?;
        ensure_dispatcher(actor, &project)?;
        check_transition(&project, ProjectStatus::Overruled)?;
        tx.execute(
            "UPDATE project_plans SET status = 'overruled', overrule_reason = ?1,
                updated_at = datetime('now')
             WHERE id = ?2",
            params![reason, id],
        )
        .context("Failed to overrule project")?;
        tx.commit().context("Failed to commit overrule")?;

        tracing::info!(project_id = id, %reason, "project overruled");
        self.get_project(id)?
            .context("Project not found after overrule")
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_project(&self, id: i64) -> Result<Option<ProjectPlan>> {
        fetch_project(&self.conn, id)
    }

    pub fn list_projects(&self, hospital_id: i64, filter: &ProjectFilter) -> Result<Vec<ProjectPlan>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE hospital_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR performer_id = ?3)
                   AND (?4 IS NULL OR creator_id = ?4)
                 ORDER BY id DESC",
                PROJECT_SELECT
            ))
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map(
                params![
                    hospital_id,
                    filter.status.map(|s| s.as_str()),
                    filter.performer_id,
                    filter.creator_id
                ],
                ProjectRow::from_row,
            )
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            let r = row.context("Failed to read project row")?;
            projects.push(r.into_project()?);
        }
        Ok(projects)
    }

    pub fn project_devices(&self, project_id: i64) -> Result<Vec<ProjectDevice>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, name, type_spec, num, measure, purpose, planned_price
                 FROM project_devices WHERE project_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare project_devices")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(ProjectDevice {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    name: row.get(2)?,
                    type_spec: row.get(3)?,
                    num: row.get(4)?,
                    measure: row.get(5)?,
                    purpose: row.get(6)?,
                    planned_price: row.get(7)?,
                })
            })
            .context("Failed to query project devices")?;
        let mut devices = Vec::new();
        for row in rows {
            devices.push(row.context("Failed to read project device row")?);
        }
        Ok(devices)
    }

    /// Milestone records in the order they were written.
    pub fn project_timeline(&self, project_id: i64) -> Result<Vec<ProjectMilestoneRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT r.id, r.project_id, r.milestone_id, m.title, r.action, r.operator_id,
                        r.summary, r.created_at
                 FROM project_milestone_records r
                 JOIN milestones m ON m.id = r.milestone_id
                 WHERE r.project_id = ?1 ORDER BY r.id",
            )
            .context("Failed to prepare project_timeline")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .context("Failed to query milestone records")?;
        let mut records = Vec::new();
        for row in rows {
            let (id, project_id, milestone_id, milestone_title, action, operator_id, summary, created_at) =
                row.context("Failed to read milestone record row")?;
            records.push(ProjectMilestoneRecord {
                id,
                project_id,
                milestone_id,
                milestone_title,
                action: parse_column(&action, "milestone action")?,
                operator_id,
                summary,
                created_at,
            });
        }
        Ok(records)
    }

    pub fn get_project_detail(&self, id: i64) -> Result<Option<ProjectDetail>> {
        let Some(project) = self.get_project(id)? else {
            return Ok(None);
        };
        let devices = self.project_devices(id)?;
        let current_milestone = match project.current_milestone_id {
            Some(mid) => self.get_milestone(mid)?,
            None => None,
        };
        let records = self.project_timeline(id)?;
        Ok(Some(ProjectDetail {
            project,
            devices,
            current_milestone,
            records,
        }))
    }

    fn get_milestone(&self, id: i64) -> Result<Option<Milestone>> {
        self.conn
            .query_row(
                "SELECT id, flow_id, parent_id, title, idx, desc FROM milestones WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Milestone {
                        id: row.get(0)?,
                        flow_id: row.get(1)?,
                        parent_id: row.get(2)?,
                        title: row.get(3)?,
                        index: row.get(4)?,
                        desc: row.get(5)?,
                    })
                },
            )
            .optional()
            .context("Failed to query milestone")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::flows::tests::procurement_flow;
    use crate::db::organization::tests::{hire, seeded};
    use crate::models::{FlowDetail, MilestoneInput, Role};

    struct Office {
        db: Db,
        admin: Staff,
        clerk: Staff,
        dispatcher: Staff,
        buyer: Staff,
        helper: Staff,
        flow: FlowDetail,
    }

    fn office() -> Office {
        let db = Db::new_in_memory().unwrap();
        let (h, admin) = seeded(&db);
        let clerk = hire(&db, &admin, "clerk", vec![]);
        let dispatcher = hire(&db, &admin, "dispatcher", vec![Role::ProjectDispatcher]);
        let buyer = hire(&db, &admin, "buyer", vec![]);
        let helper = hire(&db, &admin, "helper", vec![]);
        let flow = db.create_flow(&admin, h.id, &procurement_flow(true)).unwrap();
        Office {
            db,
            admin,
            clerk,
            dispatcher,
            buyer,
            helper,
            flow,
        }
    }

    fn device(name: &str, num: i32, price: f64) -> NewProjectDevice {
        NewProjectDevice {
            name: name.to_string(),
            type_spec: None,
            num,
            measure: Some("unit".into()),
            purpose: None,
            planned_price: price,
        }
    }

    fn plan(o: &Office, handing_type: HandingType) -> ProjectPlan {
        o.db.create_project(
            &o.clerk,
            o.clerk.hospital_id,
            &NewProject {
                title: "Replace ward monitors".into(),
                handing_type,
                project_cate: ProjectCategory::Hardware,
                purpose: "end of life".into(),
                related_dept_id: None,
                devices: vec![device("Monitor", 4, 2500.0), device("Mount", 4, 120.5)],
            },
        )
        .unwrap()
    }

    fn dispatch(o: &Office, project: &ProjectPlan) -> ProjectPlan {
        o.db.dispatch_project(
            &o.dispatcher,
            project.id,
            &ProjectDispatch {
                performer_id: o.buyer.id,
                assistant_id: Some(o.helper.id),
                flow_id: None,
            },
        )
        .unwrap()
    }

    /// Route ids: Requirement, Purchase, Tender, Contract, Acceptance.
    fn route(o: &Office) -> Vec<i64> {
        load_tree(o.db.conn(), o.flow.flow.id)
            .unwrap()
            .ordered()
            .map(|m| m.id)
            .collect()
    }

    fn admin_error(err: &anyhow::Error) -> &AdminError {
        err.downcast_ref::<AdminError>().expect("expected AdminError")
    }

    #[test]
    fn test_create_computes_estimate_and_devices() {
        let o = office();
        let p = plan(&o, HandingType::Assigned);
        assert_eq!(p.status, ProjectStatus::Pending);
        assert_eq!(p.pre_amount, 10482.0);
        assert_eq!(o.db.project_devices(p.id).unwrap().len(), 2);
    }

    #[test]
    fn test_hardware_projects_need_devices() {
        let o = office();
        let err = o
            .db
            .create_project(
                &o.clerk,
                o.clerk.hospital_id,
                &NewProject {
                    title: "Nothing".into(),
                    handing_type: HandingType::Assigned,
                    project_cate: ProjectCategory::Hardware,
                    purpose: String::new(),
                    related_dept_id: None,
                    devices: vec![],
                },
            )
            .unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Validation(_)));

        let err = o
            .db
            .create_project(
                &o.clerk,
                o.clerk.hospital_id,
                &NewProject {
                    title: "Zero".into(),
                    handing_type: HandingType::Assigned,
                    project_cate: ProjectCategory::Hardware,
                    purpose: String::new(),
                    related_dept_id: None,
                    devices: vec![device("Bed", 0, 10.0)],
                },
            )
            .unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Validation(_)));

        let service = o
            .db
            .create_project(
                &o.clerk,
                o.clerk.hospital_id,
                &NewProject {
                    title: "Cleaning contract".into(),
                    handing_type: HandingType::Assigned,
                    project_cate: ProjectCategory::Service,
                    purpose: String::new(),
                    related_dept_id: None,
                    devices: vec![],
                },
            )
            .unwrap();
        assert_eq!(service.pre_amount, 0.0);
    }

    #[test]
    fn test_update_only_while_pending() {
        let o = office();
        let p = plan(&o, HandingType::Assigned);
        let updated = o
            .db
            .update_project(
                &o.clerk,
                p.id,
                &ProjectUpdate {
                    title: Some("Replace ICU monitors".into()),
                    devices: Some(vec![device("Monitor", 2, 2500.0)]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "Replace ICU monitors");
        assert_eq!(updated.pre_amount, 5000.0);
        assert_eq!(o.db.project_devices(p.id).unwrap().len(), 1);

        let err = o
            .db
            .update_project(&o.buyer, p.id, &ProjectUpdate::default())
            .unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Forbidden(_)));

        dispatch(&o, &p);
        let err = o
            .db
            .update_project(&o.clerk, p.id, &ProjectUpdate::default())
            .unwrap_err();
        assert!(matches!(
            admin_error(&err),
            AdminError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_dispatch_enters_first_milestone() {
        let o = office();
        let p = dispatch(&o, &plan(&o, HandingType::Assigned));
        let ids = route(&o);
        assert_eq!(p.status, ProjectStatus::Started);
        assert_eq!(p.attached_flow_id, Some(o.flow.flow.id));
        assert_eq!(p.current_milestone_id, Some(ids[0]));
        assert!(p.startup_at.is_some());

        let timeline = o.db.project_timeline(p.id).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].action, MilestoneAction::Entered);
        assert_eq!(timeline[0].milestone_title, "Requirement");
    }

    #[test]
    fn test_dispatch_permissions() {
        let o = office();
        let assigned = plan(&o, HandingType::Assigned);
        let request = ProjectDispatch {
            performer_id: o.clerk.id,
            assistant_id: None,
            flow_id: None,
        };
        let err = o
            .db
            .dispatch_project(&o.clerk, assigned.id, &request)
            .unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Forbidden(_)));

        // Self-service creators may take the project on themselves.
        let own = plan(&o, HandingType::SelfService);
        let started = o.db.dispatch_project(&o.clerk, own.id, &request).unwrap();
        assert_eq!(started.performer_id, Some(o.clerk.id));

        let err = o
            .db
            .dispatch_project(&o.clerk, own.id, &request)
            .unwrap_err();
        assert!(matches!(
            admin_error(&err),
            AdminError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_walk_the_route_and_finish() {
        let o = office();
        let p = dispatch(&o, &plan(&o, HandingType::Assigned));
        let ids = route(&o);

        for (i, next) in ids.iter().enumerate().skip(1) {
            let actor = if i % 2 == 0 { &o.buyer } else { &o.helper };
            let moved = o
                .db
                .change_milestone(actor, p.id, *next, &format!("step {}", i))
                .unwrap();
            assert_eq!(moved.current_milestone_id, Some(*next));
        }

        let done = o.db.finish_project(&o.buyer, p.id, "accepted").unwrap();
        assert_eq!(done.status, ProjectStatus::Done);
        assert!(done.completed_at.is_some());

        let detail = o.db.get_project_detail(p.id).unwrap().unwrap();
        // One entered per milestone, one finished per milestone.
        assert_eq!(detail.records.len(), ids.len() * 2);
        let last = detail.records.last().unwrap();
        assert_eq!(last.action, MilestoneAction::Finished);
        assert_eq!(last.milestone_title, "Acceptance");
        assert_eq!(last.summary, "accepted");
        assert_eq!(
            detail.current_milestone.map(|m| m.title),
            Some("Acceptance".to_string())
        );
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        let o = office();
        let p = dispatch(&o, &plan(&o, HandingType::Assigned));
        let ids = route(&o);

        let err = o
            .db
            .change_milestone(&o.buyer, p.id, ids[2], "skip")
            .unwrap_err();
        assert!(matches!(
            admin_error(&err),
            AdminError::InvalidTransition { .. }
        ));

        o.db.change_milestone(&o.buyer, p.id, ids[1], "").unwrap();
        let err = o
            .db
            .change_milestone(&o.buyer, p.id, ids[0], "back")
            .unwrap_err();
        assert!(matches!(
            admin_error(&err),
            AdminError::InvalidTransition { .. }
        ));

        let err = o.db.finish_project(&o.buyer, p.id, "early").unwrap_err();
        assert!(matches!(
            admin_error(&err),
            AdminError::InvalidTransition { .. }
        ));

        // A milestone from another flow is a validation error.
        let other = o
            .db
            .create_flow(&o.admin, o.admin.hospital_id, &procurement_flow(false))
            .unwrap();
        let foreign = other.milestones[0].milestone.id;
        let err = o
            .db
            .change_milestone(&o.buyer, p.id, foreign, "")
            .unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Validation(_)));

        // Only the performer and assistant operate.
        let err = o
            .db
            .change_milestone(&o.clerk, p.id, ids[2], "")
            .unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Forbidden(_)));
    }

    #[test]
    fn test_pause_blocks_milestones_and_freezes_flow() {
        let o = office();
        let p = dispatch(&o, &plan(&o, HandingType::Assigned));
        let ids = route(&o);

        let paused = o.db.pause_project(&o.buyer, p.id).unwrap();
        assert_eq!(paused.status, ProjectStatus::Paused);
        let err = o
            .db
            .change_milestone(&o.buyer, p.id, ids[1], "")
            .unwrap_err();
        assert!(matches!(
            admin_error(&err),
            AdminError::InvalidTransition { .. }
        ));

        let err = o
            .db
            .add_milestone(
                &o.admin,
                o.flow.flow.id,
                &MilestoneInput {
                    title: "Audit".into(),
                    desc: String::new(),
                    parent_id: None,
                    index: None,
                },
            )
            .unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Conflict(_)));
        let err = o.db.delete_flow(&o.admin, o.flow.flow.id).unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Conflict(_)));

        let resumed = o.db.resume_project(&o.dispatcher, p.id).unwrap();
        assert_eq!(resumed.status, ProjectStatus::Started);
    }

    #[test]
    fn test_redispatch_and_overrule() {
        let o = office();
        let pending = plan(&o, HandingType::Assigned);
        let err = o
            .db
            .redispatch_project(&o.dispatcher, pending.id, o.clerk.id, None)
            .unwrap_err();
        assert!(matches!(
            admin_error(&err),
            AdminError::InvalidTransition { .. }
        ));

        let err = o
            .db
            .overrule_project(&o.dispatcher, pending.id, "  ")
            .unwrap_err();
        assert!(matches!(admin_error(&err), AdminError::Validation(_)));
        let overruled = o
            .db
            .overrule_project(&o.dispatcher, pending.id, "over budget")
            .unwrap();
        assert_eq!(overruled.status, ProjectStatus::Overruled);
        assert_eq!(overruled.overrule_reason.as_deref(), Some("over budget"));

        let running = dispatch(&o, &plan(&o, HandingType::Assigned));
        let moved = o
            .db
            .redispatch_project(&o.dispatcher, running.id, o.clerk.id, None)
            .unwrap();
        assert_eq!(moved.performer_id, Some(o.clerk.id));
        assert_eq!(moved.assistant_id, Some(o.helper.id));

        let err = o
            .db
            .overrule_project(&o.dispatcher, running.id, "late")
            .unwrap_err();
        assert!(matches!(
            admin_error(&err),
            AdminError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_milestone_records_are_immutable() {
        let o = office();
        let p = dispatch(&o, &plan(&o, HandingType::Assigned));
        let conn = o.db.conn();
        assert!(
            conn.execute(
                "UPDATE project_milestone_records SET summary = 'edited' WHERE project_id = ?1",
                params![p.id],
            )
            .is_err()
        );
        assert!(
            conn.execute(
                "DELETE FROM project_milestone_records WHERE project_id = ?1",
                params![p.id],
            )
            .is_err()
        );
        assert_eq!(o.db.project_timeline(p.id).unwrap().len(), 1);
    }

    #[test]
    fn test_list_filters() {
        let o = office();
        let a = plan(&o, HandingType::Assigned);
        plan(&o, HandingType::Assigned);
        dispatch(&o, &a);

        let by_performer = |id: i64| {
            o.db.list_projects(
                o.clerk.hospital_id,
                &ProjectFilter {
                    performer_id: Some(id),
                    ..Default::default()
                },
            )
            .unwrap()
        };
        assert_eq!(by_performer(o.buyer.id).len(), 1);
        // Assisting is not performing.
        assert!(by_performer(o.helper.id).is_empty());
        let pending = o
            .db
            .list_projects(
                o.clerk.hospital_id,
                &ProjectFilter {
                    status: Some(ProjectStatus::Pending),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            o.db.list_projects(o.clerk.hospital_id, &ProjectFilter::default())
                .unwrap()
                .len(),
            2
        );
    }
}
