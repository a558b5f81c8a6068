//! Permission predicates over the acting staff member.
//!
//! `ensure_*` helpers return `AdminError::Forbidden` so callers can `?`
//! them inside data-layer closures.

use crate::errors::AdminError;
use crate::models::{ProjectPlan, ProjectStatus, RepairOrder, Role, Staff};

pub fn same_hospital(actor: &Staff, hospital_id: i64) -> bool {
    actor.hospital_id == hospital_id
}

pub fn is_admin(actor: &Staff) -> bool {
    actor.has_role(Role::Admin)
}

pub fn can_manage_assets(actor: &Staff) -> bool {
    actor.has_any_role(&[Role::Admin, Role::AssetManager])
}

pub fn can_dispatch_repairs(actor: &Staff) -> bool {
    actor.has_any_role(&[Role::Admin, Role::RepairDispatcher])
}

pub fn can_dispatch_projects(actor: &Staff) -> bool {
    actor.has_any_role(&[Role::Admin, Role::ProjectDispatcher])
}

pub fn is_maintainer(staff: &Staff) -> bool {
    staff.has_role(Role::Maintainer)
}

/// Performer or assistant of the project.
pub fn can_operate_project(actor: &Staff, project: &ProjectPlan) -> bool {
    project.performer_id == Some(actor.id) || project.assistant_id == Some(actor.id)
}

/// Creator or admin, and only before the project has been dispatched.
pub fn can_edit_project(actor: &Staff, project: &ProjectPlan) -> bool {
    project.status == ProjectStatus::Pending
        && (project.creator_id == actor.id || is_admin(actor))
}

pub fn is_order_applicant(actor: &Staff, order: &RepairOrder) -> bool {
    order.applicant_id == actor.id
}

pub fn is_assigned_maintainer(actor: &Staff, order: &RepairOrder) -> bool {
    order.maintainer_id == Some(actor.id)
}

pub fn ensure(allowed: bool, what: &str) -> Result<(), AdminError> {
    if allowed {
        Ok(())
    } else {
        Err(AdminError::forbidden(what.to_string()))
    }
}

pub fn ensure_same_hospital(actor: &Staff, hospital_id: i64) -> Result<(), AdminError> {
    ensure(
        same_hospital(actor, hospital_id),
        "resource belongs to another hospital",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HandingType, ProjectCategory};

    fn staff(id: i64, roles: Vec<Role>) -> Staff {
        Staff {
            id,
            hospital_id: 1,
            department_id: None,
            account_id: id,
            username: format!("user{}", id),
            name: format!("User {}", id),
            title: None,
            contact: None,
            email: None,
            roles,
            is_active: true,
            created_at: String::new(),
        }
    }

    fn project(status: ProjectStatus) -> ProjectPlan {
        ProjectPlan {
            id: 1,
            hospital_id: 1,
            title: "CT scanner".into(),
            handing_type: HandingType::Assigned,
            project_cate: ProjectCategory::Hardware,
            purpose: String::new(),
            pre_amount: 0.0,
            creator_id: 10,
            related_dept_id: None,
            performer_id: Some(20),
            assistant_id: Some(21),
            attached_flow_id: None,
            current_milestone_id: None,
            status,
            overrule_reason: None,
            startup_at: None,
            completed_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn role_predicates() {
        let admin = staff(1, vec![Role::Admin]);
        let clerk = staff(2, vec![]);
        let keeper = staff(3, vec![Role::AssetManager]);
        assert!(can_manage_assets(&admin));
        assert!(can_manage_assets(&keeper));
        assert!(!can_manage_assets(&clerk));
        assert!(can_dispatch_projects(&admin));
        assert!(!can_dispatch_projects(&keeper));
        assert!(!can_dispatch_repairs(&clerk));
        assert!(!is_maintainer(&admin));
    }

    #[test]
    fn project_operators() {
        let p = project(ProjectStatus::Started);
        assert!(can_operate_project(&staff(20, vec![]), &p));
        assert!(can_operate_project(&staff(21, vec![]), &p));
        assert!(!can_operate_project(&staff(10, vec![]), &p));
    }

    #[test]
    fn project_editing_only_while_pending() {
        let creator = staff(10, vec![]);
        let admin = staff(99, vec![Role::Admin]);
        let other = staff(50, vec![]);
        assert!(can_edit_project(&creator, &project(ProjectStatus::Pending)));
        assert!(can_edit_project(&admin, &project(ProjectStatus::Pending)));
        assert!(!can_edit_project(&other, &project(ProjectStatus::Pending)));
        assert!(!can_edit_project(&creator, &project(ProjectStatus::Started)));
    }

    #[test]
    fn cross_hospital_is_forbidden() {
        let actor = staff(1, vec![Role::Admin]);
        assert!(ensure_same_hospital(&actor, 1).is_ok());
        assert!(matches!(
            ensure_same_hospital(&actor, 2),
            Err(AdminError::Forbidden(_))
        ));
    }
}
