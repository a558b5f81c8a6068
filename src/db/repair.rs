use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};

use super::assets::{fetch_asset, has_open_orders, set_asset_status};
use super::organization::require_colleague;
use super::sequence::{daily_key, format_order_no, next_value};
use super::{Db, parse_column};
use crate::errors::{AdminError, require};
use crate::models::{
    AssetStatus, FaultType, NewFaultType, NewRepairOrder, RepairAction, RepairCompletion,
    RepairOrder, RepairOrderDetail, RepairOrderFilter, RepairOrderRecord, RepairStats,
    RepairStatus, Staff,
};
use crate::permissions::{self, ensure, ensure_same_hospital};
use crate::validation::{non_negative, optional_text, rating, required_text, round_amount};

const ORDER_SELECT: &str = "SELECT id, hospital_id, order_no, asset_id, applicant_id, fault_type_id, priority,
        desc, status, maintainer_id, result, solution, expenses, rating, comment, created_at,
        dispatched_at, completed_at, closed_at, updated_at
     FROM repair_orders";

/// Intermediate row struct for repair_orders.
struct OrderRow {
    id: i64,
    hospital_id: i64,
    order_no: String,
    asset_id: i64,
    applicant_id: i64,
    fault_type_id: Option<i64>,
    priority: String,
    desc: String,
    status: String,
    maintainer_id: Option<i64>,
    result: Option<String>,
    solution: Option<String>,
    expenses: Option<f64>,
    rating: Option<i32>,
    comment: Option<String>,
    created_at: String,
    dispatched_at: Option<String>,
    completed_at: Option<String>,
    closed_at: Option<String>,
    updated_at: String,
}

impl OrderRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hospital_id: row.get(1)?,
            order_no: row.get(2)?,
            asset_id: row.get(3)?,
            applicant_id: row.get(4)?,
            fault_type_id: row.get(5)?,
            priority: row.get(6)?,
            desc: row.get(7)?,
            status: row.get(8)?,
            maintainer_id: row.get(9)?,
            result: row.get(10)?,
            solution: row.get(11)?,
            expenses: row.get(12)?,
            rating: row.get(13)?,
            comment: row.get(14)?,
            created_at: row.get(15)?,
            dispatched_at: row.get(16)?,
            completed_at: row.get(17)?,
            closed_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }

    fn into_order(self) -> Result<RepairOrder> {
        Ok(RepairOrder {
            id: self.id,
            hospital_id: self.hospital_id,
            order_no: self.order_no,
            asset_id: self.asset_id,
            applicant_id: self.applicant_id,
            fault_type_id: self.fault_type_id,
            priority: parse_column(&self.priority, "repair priority")?,
            desc: self.desc,
            status: parse_column(&self.status, "repair status")?,
            maintainer_id: self.maintainer_id,
            result: self.result,
            solution: self.solution,
            expenses: self.expenses,
            rating: self.rating,
            comment: self.comment,
            created_at: self.created_at,
            dispatched_at: self.dispatched_at,
            completed_at: self.completed_at,
            closed_at: self.closed_at,
            updated_at: self.updated_at,
        })
    }
}

fn fetch_order(conn: &Connection, id: i64) -> Result<Option<RepairOrder>> {
    let row = conn
        .query_row(
            &format!("{} WHERE id = ?1", ORDER_SELECT),
            params![id],
            OrderRow::from_row,
        )
        .optional()
        .context("Failed to query repair order")?;
    row.map(OrderRow::into_order).transpose()
}

fn fetch_fault_type(conn: &Connection, id: i64) -> Result<Option<FaultType>> {
    conn.query_row(
        "SELECT id, hospital_id, parent_id, title, desc FROM fault_types WHERE id = ?1",
        params![id],
        |row| {
            Ok(FaultType {
                id: row.get(0)?,
                hospital_id: row.get(1)?,
                parent_id: row.get(2)?,
                title: row.get(3)?,
                desc: row.get(4)?,
            })
        },
    )
    .optional()
    .context("Failed to query fault type")
}

fn append_record(
    conn: &Connection,
    order_id: i64,
    operator_id: i64,
    action: RepairAction,
    from: Option<RepairStatus>,
    to: RepairStatus,
    message: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO repair_order_records (order_id, operator_id, action, from_status, to_status, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            order_id,
            operator_id,
            action.as_str(),
            from.map(|s| s.as_str()),
            to.as_str(),
            message
        ],
    )
    .context("Failed to insert repair order record")?;
    Ok(())
}

/// Reject moves the lifecycle does not allow.
fn check_transition(order: &RepairOrder, to: RepairStatus) -> Result<(), AdminError> {
    if order.status.can_transition_to(to) {
        return Ok(());
    }
    tracing::warn!(
        order_no = %order.order_no,
        from = %order.status,
        to = %to,
        "rejected repair order transition"
    );
    Err(AdminError::transition("repair order", order.status, to))
}

/// Put the asset back in service once its last open order is resolved.
fn release_asset(conn: &Connection, order: &RepairOrder) -> Result<()> {
    if has_open_orders(conn, order.asset_id, Some(order.id))? {
        return Ok(());
    }
    let asset = require(fetch_asset(conn, order.asset_id)?, "Asset", order.asset_id)?;
    if asset.status == AssetStatus::Repairing {
        set_asset_status(conn, asset.id, AssetStatus::Using)?;
    }
    Ok(())
}

impl Db {
    // ── Fault types ───────────────────────────────────────────────────

    pub fn create_fault_type(
        &self,
        actor: &Staff,
        hospital_id: i64,
        input: &NewFaultType,
    ) -> Result<FaultType> {
        ensure_same_hospital(actor, hospital_id)?;
        ensure(
            permissions::can_dispatch_repairs(actor),
            "repair dispatcher role required",
        )?;
        let title = required_text("title", &input.title)?;
        if let Some(parent_id) = input.parent_id {
            let parent = require(
                fetch_fault_type(&self.conn, parent_id)?,
                "Fault type",
                parent_id,
            )?;
            if parent.hospital_id != hospital_id {
                return Err(AdminError::validation(format!(
                    "Fault type {} belongs to another hospital",
                    parent_id
                ))
                .into());
            }
            if parent.parent_id.is_some() {
                return Err(AdminError::validation(
                    "fault types are limited to two levels",
                )
                .into());
            }
        }

        self.conn
            .execute(
                "INSERT INTO fault_types (hospital_id, parent_id, title, desc) VALUES (?1, ?2, ?3, ?4)",
                params![hospital_id, input.parent_id, title, input.desc.trim()],
            )
            .context("Failed to insert fault type")?;
        let id = self.conn.last_insert_rowid();
        fetch_fault_type(&self.conn, id)?.context("Fault type not found after insert")
    }

    pub fn list_fault_types(&self, hospital_id: i64) -> Result<Vec<FaultType>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, hospital_id, parent_id, title, desc FROM fault_types
                 WHERE hospital_id = ?1 ORDER BY COALESCE(parent_id, id), id",
            )
            .context("Failed to prepare list_fault_types")?;
        let rows = stmt
            .query_map(params![hospital_id], |row| {
                Ok(FaultType {
                    id: row.get(0)?,
                    hospital_id: row.get(1)?,
                    parent_id: row.get(2)?,
                    title: row.get(3)?,
                    desc: row.get(4)?,
                })
            })
            .context("Failed to query fault types")?;
        let mut types = Vec::new();
        for row in rows {
            types.push(row.context("Failed to read fault type row")?);
        }
        Ok(types)
    }

    // ── Orders ────────────────────────────────────────────────────────

    /// Submit a repair order.
    ///
    /// Number allocation, the insert, the `create` record and the asset
    /// status change share one IMMEDIATE transaction, so a failure anywhere
    /// leaves the day's counter untouched.
    pub fn create_order(
        &self,
        actor: &Staff,
        input: &NewRepairOrder,
        prefix: &str,
        today: NaiveDate,
    ) -> Result<RepairOrder> {
        let desc = required_text("desc", &input.desc)?;

        let tx = self.immediate()?;
        let asset = require(fetch_asset(&tx, input.asset_id)?, "Asset", input.asset_id)?;
        ensure_same_hospital(actor, asset.hospital_id)?;
        if asset.status == AssetStatus::Scrapped {
            return Err(AdminError::validation(format!(
                "Asset {} is scrapped",
                asset.asset_no
            ))
            .into());
        }
        if let Some(fault_type_id) = input.fault_type_id {
            let fault = require(
                fetch_fault_type(&tx, fault_type_id)?,
                "Fault type",
                fault_type_id,
            )?;
            if fault.hospital_id != asset.hospital_id {
                return Err(AdminError::validation(format!(
                    "Fault type {} belongs to another hospital",
                    fault_type_id
                ))
                .into());
            }
        }

        let value = next_value(&tx, &daily_key(prefix, today))?;
        let order_no = format_order_no(prefix, today, value);

        tx.execute(
            "INSERT INTO repair_orders (hospital_id, order_no, asset_id, applicant_id, fault_type_id, priority, desc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                asset.hospital_id,
                order_no,
                asset.id,
                actor.id,
                input.fault_type_id,
                input.priority.as_str(),
                desc
            ],
        )
        .context("Failed to insert repair order")?;
        let id = tx.last_insert_rowid();
        append_record(
            &tx,
            id,
            actor.id,
            RepairAction::Create,
            None,
            RepairStatus::Submitted,
            &desc,
        )?;
        set_asset_status(&tx, asset.id, AssetStatus::Repairing)?;
        tx.commit().context("Failed to commit repair order")?;

        tracing::info!(order_id = id, %order_no, asset_id = asset.id, "repair order submitted");
        self.get_order(id)?
            .context("Repair order not found after insert")
    }

    /// Assign (or reassign) a maintainer.
    pub fn dispatch_order(
        &self,
        actor: &Staff,
        id: i64,
        maintainer_id: i64,
        message: Option<&str>,
    ) -> Result<RepairOrder> {
        let tx = self.immediate()?;
        let order = require(fetch_order(&tx, id)?, "Repair order", id)?;
        ensure_same_hospital(actor, order.hospital_id)?;
        ensure(
            permissions::can_dispatch_repairs(actor),
            "repair dispatcher role required",
        )?;
        check_transition(&order, RepairStatus::Dispatched)?;
        let maintainer = require_colleague(&tx, order.hospital_id, maintainer_id, "maintainer")?;
        if !permissions::is_maintainer(&maintainer) {
            return Err(AdminError::validation(format!(
                "Staff {} is not a maintainer",
                maintainer_id
            ))
            .into());
        }

        tx.execute(
            "UPDATE repair_orders SET status = 'dispatched', maintainer_id = ?1,
                dispatched_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?2",
            params![maintainer_id, id],
        )
        .context("Failed to dispatch repair order")?;
        let note = optional_text(message)
            .unwrap_or_else(|| format!("assigned to {}", maintainer.name));
        append_record(
            &tx,
            id,
            actor.id,
            RepairAction::Dispatch,
            Some(order.status),
            RepairStatus::Dispatched,
            &note,
        )?;
        tx.commit().context("Failed to commit dispatch")?;

        tracing::info!(order_no = %order.order_no, maintainer_id, "repair order dispatched");
        self.get_order(id)?
            .context("Repair order not found after dispatch")
    }

    pub fn complete_order(
        &self,
        actor: &Staff,
        id: i64,
        input: &RepairCompletion,
    ) -> Result<RepairOrder> {
        let result = required_text("result", &input.result)?;
        let expenses = round_amount(non_negative("expenses", input.expenses)?);

        let tx = self.immediate()?;
        let order = require(fetch_order(&tx, id)?, "Repair order", id)?;
        ensure(
            permissions::is_assigned_maintainer(actor, &order),
            "only the assigned maintainer may complete this order",
        )?;
        check_transition(&order, RepairStatus::Done)?;

        tx.execute(
            "UPDATE repair_orders SET status = 'done', result = ?1, solution = ?2, expenses = ?3,
                completed_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?4",
            params![result, optional_text(input.solution.as_deref()), expenses, id],
        )
        .context("Failed to complete repair order")?;
        append_record(
            &tx,
            id,
            actor.id,
            RepairAction::Complete,
            Some(order.status),
            RepairStatus::Done,
            &result,
        )?;
        release_asset(&tx, &order)?;
        tx.commit().context("Failed to commit completion")?;

        tracing::info!(order_no = %order.order_no, expenses, "repair order completed");
        self.get_order(id)?
            .context("Repair order not found after completion")
    }

    pub fn close_order(
        &self,
        actor: &Staff,
        id: i64,
        score: Option<i32>,
        comment: Option<&str>,
    ) -> Result<RepairOrder> {
        let score = rating(score)?;
        let comment = optional_text(comment);

        let tx = self.immediate()?;
        let order = require(fetch_order(&tx, id)?, "Repair order", id)?;
        ensure_same_hospital(actor, order.hospital_id)?;
        ensure(
            permissions::is_order_applicant(actor, &order) || permissions::is_admin(actor),
            "only the applicant or an admin may close this order",
        )?;
        check_transition(&order, RepairStatus::Closed)?;

        tx.execute(
            "UPDATE repair_orders SET status = 'closed', rating = ?1, comment = ?2,
                closed_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?3",
            params![score, comment, id],
        )
        .context("Failed to close repair order")?;
        append_record(
            &tx,
            id,
            actor.id,
            RepairAction::Close,
            Some(order.status),
            RepairStatus::Closed,
            comment.as_deref().unwrap_or(""),
        )?;
        tx.commit().context("Failed to commit close")?;

        tracing::info!(order_no = %order.order_no, rating = ?score, "repair order closed");
        self.get_order(id)?
            .context("Repair order not found after close")
    }

    pub fn cancel_order(&self, actor: &Staff, id: i64, reason: &str) -> Result<RepairOrder> {
        let reason = required_text("reason", reason)?;

        let tx = self.immediate()?;
        let order = require(fetch_order(&tx, id)?, "Repair order", id)?;
        ensure_same_hospital(actor, order.hospital_id)?;
        ensure(
            permissions::is_order_applicant(actor, &order) || permissions::is_admin(actor),
            "only the applicant or an admin may cancel this order",
        )?;
        check_transition(&order, RepairStatus::Cancelled)?;

        tx.execute(
            "UPDATE repair_orders SET status = 'cancelled', closed_at = datetime('now'),
                updated_at = datetime('now')
             WHERE id = ?1",
            params![id],
        )
        .context("Failed to cancel repair order")?;
        append_record(
            &tx,
            id,
            actor.id,
            RepairAction::Cancel,
            Some(order.status),
            RepairStatus::Cancelled,
            &reason,
        )?;
        release_asset(&tx, &order)?;
        tx.commit().context("Failed to commit cancellation")?;

        tracing::info!(order_no = %order.order_no, "repair order cancelled");
        self.get_order(id)?
            .context("Repair order not found after cancel")
    }

    pub fn get_order(&self, id: i64) -> Result<Option<RepairOrder>> {
        fetch_order(&self.conn, id)
    }

    pub fn list_orders(
        &self,
        hospital_id: i64,
        filter: &RepairOrderFilter,
    ) -> Result<Vec<RepairOrder>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE hospital_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR maintainer_id = ?3)
                   AND (?4 IS NULL OR applicant_id = ?4)
                 ORDER BY id DESC",
                ORDER_SELECT
            ))
            .context("Failed to prepare list_orders")?;
        let rows = stmt
            .query_map(
                params![
                    hospital_id,
                    filter.status.map(|s| s.as_str()),
                    filter.maintainer_id,
                    filter.applicant_id
                ],
                OrderRow::from_row,
            )
            .context("Failed to query repair orders")?;
        let mut orders = Vec::new();
        for row in rows {
            let r = row.context("Failed to read repair order row")?;
            orders.push(r.into_order()?);
        }
        Ok(orders)
    }

    pub fn get_order_records(&self, order_id: i64) -> Result<Vec<RepairOrderRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, order_id, operator_id, action, from_status, to_status, message, created_at
                 FROM repair_order_records WHERE order_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare get_order_records")?;
        let rows = stmt
            .query_map(params![order_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .context("Failed to query repair order records")?;
        let mut records = Vec::new();
        for row in rows {
            let (id, order_id, operator_id, action, from, to, message, created_at) =
                row.context("Failed to read repair order record row")?;
            records.push(RepairOrderRecord {
                id,
                order_id,
                operator_id,
                action: parse_column(&action, "repair action")?,
                from_status: from
                    .map(|s| parse_column(&s, "repair status"))
                    .transpose()?,
                to_status: parse_column(&to, "repair status")?,
                message,
                created_at,
            });
        }
        Ok(records)
    }

    pub fn get_order_detail(&self, id: i64) -> Result<Option<RepairOrderDetail>> {
        let Some(order) = self.get_order(id)? else {
            return Ok(None);
        };
        let records = self.get_order_records(id)?;
        Ok(Some(RepairOrderDetail { order, records }))
    }

    /// Order counts per status for one hospital.
    pub fn order_stats(&self, hospital_id: i64) -> Result<RepairStats> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT status, COUNT(*) FROM repair_orders WHERE hospital_id = ?1 GROUP BY status",
            )
            .context("Failed to prepare order_stats")?;
        let rows = stmt
            .query_map(params![hospital_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to query order stats")?;
        let mut stats = RepairStats {
            hospital_id,
            ..Default::default()
        };
        for row in rows {
            let (status, count) = row.context("Failed to read order stats row")?;
            stats.add(parse_column(&status, "repair status")?, count);
        }
        Ok(stats)
    }
}
