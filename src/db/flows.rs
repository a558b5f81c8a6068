use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::Db;
use crate::errors::{AdminError, require};
use crate::milestone::MilestoneTree;
use crate::models::{
    FlowDetail, Milestone, MilestoneInput, NewFlow, NewMilestone, ProjectFlow, Staff,
};
use crate::permissions::{self, ensure, ensure_same_hospital};
use crate::validation::required_text;

fn flow_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectFlow> {
    Ok(ProjectFlow {
        id: row.get(0)?,
        hospital_id: row.get(1)?,
        title: row.get(2)?,
        default_flow: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn fetch_flow(conn: &Connection, id: i64) -> Result<Option<ProjectFlow>> {
    conn.query_row(
        "SELECT id, hospital_id, title, default_flow, created_at FROM project_flows WHERE id = ?1",
        params![id],
        flow_from_row,
    )
    .optional()
    .context("Failed to query flow")
}

pub(crate) fn default_flow_id(conn: &Connection, hospital_id: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM project_flows WHERE hospital_id = ?1 AND default_flow = 1",
        params![hospital_id],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to query default flow")
}

pub(crate) fn fetch_milestones(conn: &Connection, flow_id: i64) -> Result<Vec<Milestone>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, flow_id, parent_id, title, idx, desc FROM milestones
             WHERE flow_id = ?1 ORDER BY idx, id",
        )
        .context("Failed to prepare fetch_milestones")?;
    let rows = stmt
        .query_map(params![flow_id], |row| {
            Ok(Milestone {
                id: row.get(0)?,
                flow_id: row.get(1)?,
                parent_id: row.get(2)?,
                title: row.get(3)?,
                index: row.get(4)?,
                desc: row.get(5)?,
            })
        })
        .context("Failed to query milestones")?;
    let mut milestones = Vec::new();
    for row in rows {
        milestones.push(row.context("Failed to read milestone row")?);
    }
    Ok(milestones)
}

pub(crate) fn load_tree(conn: &Connection, flow_id: i64) -> Result<MilestoneTree> {
    let milestones = fetch_milestones(conn, flow_id)?;
    Ok(MilestoneTree::build(flow_id, milestones)?)
}

fn insert_milestones(
    conn: &Connection,
    flow_id: i64,
    parent_id: Option<i64>,
    items: &[NewMilestone],
) -> Result<usize> {
    let mut inserted = 0;
    for (index, item) in items.iter().enumerate() {
        let title = required_text("milestone title", &item.title)?;
        conn.execute(
            "INSERT INTO milestones (flow_id, parent_id, title, idx, desc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![flow_id, parent_id, title, index as i32, item.desc.trim()],
        )
        .context("Failed to insert milestone")?;
        let id = conn.last_insert_rowid();
        inserted += 1 + insert_milestones(conn, flow_id, Some(id), &item.children)?;
    }
    Ok(inserted)
}

fn clear_default(conn: &Connection, hospital_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE project_flows SET default_flow = 0 WHERE hospital_id = ?1 AND default_flow = 1",
        params![hospital_id],
    )
    .context("Failed to clear default flow")?;
    Ok(())
}

fn count_projects(conn: &Connection, flow_id: i64, in_flight_only: bool) -> Result<i64> {
    let sql = if in_flight_only {
        "SELECT COUNT(*) FROM project_plans
         WHERE attached_flow_id = ?1 AND status IN ('started', 'paused')"
    } else {
        "SELECT COUNT(*) FROM project_plans WHERE attached_flow_id = ?1"
    };
    conn.query_row(sql, params![flow_id], |row| row.get(0))
        .context("Failed to count projects on flow")
}

fn ensure_flow_admin(actor: &Staff, hospital_id: i64) -> Result<(), AdminError> {
    ensure_same_hospital(actor, hospital_id)?;
    ensure(permissions::is_admin(actor), "admin role required")
}

impl Db {
    /// Create a flow with its nested milestones. Sibling order follows the
    /// payload order.
    pub fn create_flow(&self, actor: &Staff, hospital_id: i64, input: &NewFlow) -> Result<FlowDetail> {
        ensure_flow_admin(actor, hospital_id)?;
        let title = required_text("title", &input.title)?;
        if input.milestones.is_empty() {
            return Err(AdminError::validation("a flow needs at least one milestone").into());
        }

        let tx = self.immediate()?;
        if input.default_flow {
            clear_default(&tx, hospital_id)?;
        }
        tx.execute(
            "INSERT INTO project_flows (hospital_id, title, default_flow) VALUES (?1, ?2, ?3)",
            params![hospital_id, title, input.default_flow],
        )
        .context("Failed to insert flow")?;
        let id = tx.last_insert_rowid();
        let count = insert_milestones(&tx, id, None, &input.milestones)?;
        tx.commit().context("Failed to commit flow creation")?;

        tracing::info!(flow_id = id, milestones = count, default = input.default_flow, "flow created");
        self.get_flow_detail(id)?
            .context("Flow not found after insert")
    }

    pub fn list_flows(&self, hospital_id: i64) -> Result<Vec<ProjectFlow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, hospital_id, title, default_flow, created_at FROM project_flows
                 WHERE hospital_id = ?1 ORDER BY default_flow DESC, id",
            )
            .context("Failed to prepare list_flows")?;
        let rows = stmt
            .query_map(params![hospital_id], flow_from_row)
            .context("Failed to query flows")?;
        let mut flows = Vec::new();
        for row in rows {
            flows.push(row.context("Failed to read flow row")?);
        }
        Ok(flows)
    }

    pub fn get_flow(&self, id: i64) -> Result<Option<ProjectFlow>> {
        fetch_flow(&self.conn, id)
    }

    pub fn get_flow_detail(&self, id: i64) -> Result<Option<FlowDetail>> {
        let Some(flow) = self.get_flow(id)? else {
            return Ok(None);
        };
        let tree = load_tree(&self.conn, id)?;
        Ok(Some(FlowDetail {
            flow,
            milestones: tree.nodes(),
        }))
    }

    pub fn set_default_flow(&self, actor: &Staff, id: i64) -> Result<ProjectFlow> {
        let tx = self.immediate()?;
        let flow = require(fetch_flow(&tx, id)?, "Flow", id)?;
        ensure_flow_admin(actor, flow.hospital_id)?;
        clear_default(&tx, flow.hospital_id)?;
        tx.execute(
            "UPDATE project_flows SET default_flow = 1 WHERE id = ?1",
            params![id],
        )
        .context("Failed to set default flow")?;
        tx.commit().context("Failed to commit default flow")?;
        tracing::info!(flow_id = id, hospital_id = flow.hospital_id, "default flow changed");
        self.get_flow(id)?.context("Flow not found after update")
    }

    /// Append a milestone. The route of a running project must not shift
    /// under it, so flows with started or paused projects are frozen.
    pub fn add_milestone(&self, actor: &Staff, flow_id: i64, input: &MilestoneInput) -> Result<Milestone> {
        let title = required_text("title", &input.title)?;

        let tx = self.immediate()?;
        let flow = require(fetch_flow(&tx, flow_id)?, "Flow", flow_id)?;
        ensure_flow_admin(actor, flow.hospital_id)?;
        let running = count_projects(&tx, flow_id, true)?;
        if running > 0 {
            return Err(AdminError::conflict(format!(
                "Flow '{}' has {} project(s) in progress",
                flow.title, running
            ))
            .into());
        }

        let tree = load_tree(&tx, flow_id)?;
        if let Some(parent) = input.parent_id {
            if !tree.contains(parent) {
                return Err(AdminError::validation(format!(
                    "Milestone {} is not part of flow {}",
                    parent, flow_id
                ))
                .into());
            }
        }
        let index = match input.index {
            Some(i) => i,
            None => tx
                .query_row(
                    "SELECT COALESCE(MAX(idx), -1) + 1 FROM milestones
                     WHERE flow_id = ?1 AND parent_id IS ?2",
                    params![flow_id, input.parent_id],
                    |row| row.get(0),
                )
                .context("Failed to compute milestone index")?,
        };

        tx.execute(
            "INSERT INTO milestones (flow_id, parent_id, title, idx, desc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![flow_id, input.parent_id, title, index, input.desc.trim()],
        )
        .context("Failed to insert milestone")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit milestone")?;

        tracing::info!(flow_id, milestone_id = id, index, "milestone added");
        Ok(Milestone {
            id,
            flow_id,
            parent_id: input.parent_id,
            title,
            index,
            desc: input.desc.trim().to_string(),
        })
    }

    /// Delete an unused flow together with its milestones.
    pub fn delete_flow(&self, actor: &Staff, id: i64) -> Result<()> {
        let tx = self.immediate()?;
        let flow = require(fetch_flow(&tx, id)?, "Flow", id)?;
        ensure_flow_admin(actor, flow.hospital_id)?;
        let used = count_projects(&tx, id, false)?;
        if used > 0 {
            return Err(AdminError::conflict(format!(
                "Flow '{}' is referenced by {} project(s)",
                flow.title, used
            ))
            .into());
        }
        tx.execute("DELETE FROM project_flows WHERE id = ?1", params![id])
            .context("Failed to delete flow")?;
        tx.commit().context("Failed to commit flow deletion")?;
        tracing::info!(flow_id = id, "flow deleted");
        Ok(())
    }
}
