//! The default project-management registry.

use crate::entity::EntitySchema;
use crate::error::Result;
use crate::field::FieldKind;
use crate::registry::SchemaRegistry;
use crate::relationship::{Cardinality, Relationship};
use crate::transition::TransitionTable;

/// Precondition tag: every hard dependency of the record is complete.
pub const DEPENDENCIES_DONE: &str = "dependencies_done";

/// Precondition tag: every child record (tasks of an epic, ...) is complete.
pub const CHILDREN_DONE: &str = "children_done";

/// Precondition tag: acceptance criteria have been signed off.
pub const ACCEPTANCE_MET: &str = "acceptance_met";

const PRIORITIES: [&str; 4] = ["low", "medium", "high", "critical"];
const LEVELS: [&str; 3] = ["low", "medium", "high"];

fn ref_to(ty: &str) -> FieldKind {
    FieldKind::Reference(ty.to_string())
}

fn refs_to(ty: &str) -> FieldKind {
    FieldKind::ReferenceList(ty.to_string())
}

fn work_item_transitions() -> TransitionTable {
    TransitionTable::new()
        .allow("todo", "in_progress")
        .allow("todo", "blocked")
        .allow("todo", "cancelled")
        .allow("in_progress", "blocked")
        .allow("blocked", "in_progress")
        .allow_if("in_progress", "review", DEPENDENCIES_DONE)
        .allow("review", "in_progress")
        .allow_if("review", "done", ACCEPTANCE_MET)
        .allow("in_progress", "cancelled")
        .allow("blocked", "cancelled")
        .allow("done", "in_progress")
}

const WORK_STATUSES: [&str; 6] = ["todo", "in_progress", "blocked", "review", "done", "cancelled"];

/// Registry covering the project-management entity graph.
///
/// Embeddable types: project, objective, epic, feature, user_story, task,
/// decision, risk, issue, requirement, change_request, constraint, release,
/// meeting, retrospective, assumption, lesson, document, glossary_term, note.
pub fn project_registry() -> Result<SchemaRegistry> {
    let project = EntitySchema::builder("project", "projects")
        .required("name", FieldKind::String)
        .optional("description", FieldKind::Text)
        .optional("goals", FieldKind::StringList)
        .required("status", FieldKind::one_of(["active", "paused", "archived"]))
        .optional("created_at", FieldKind::Timestamp)
        .embeddable()
        .build();

    let milestone = EntitySchema::builder("milestone", "milestones")
        .required("title", FieldKind::String)
        .required("project_id", ref_to("project"))
        .optional("due", FieldKind::Timestamp)
        .status(["planned", "in_progress", "reached", "missed"])
        .transitions(
            TransitionTable::new()
                .allow("planned", "in_progress")
                .allow_if("in_progress", "reached", CHILDREN_DONE)
                .allow("in_progress", "missed")
                .allow("missed", "in_progress"),
        )
        .build();

    let epic = EntitySchema::builder("epic", "epics")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .optional("project_id", ref_to("project"))
        .optional("milestone_id", ref_to("milestone"))
        .optional("priority", FieldKind::one_of(PRIORITIES))
        .status(["draft", "active", "done", "cancelled"])
        .transitions(
            TransitionTable::new()
                .allow("draft", "active")
                .allow("draft", "cancelled")
                .allow_if("active", "done", CHILDREN_DONE)
                .allow("active", "cancelled")
                .allow("done", "active"),
        )
        .embeddable()
        .build();

    let task = EntitySchema::builder("task", "tasks")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .optional("epic_id", ref_to("epic"))
        .optional("assignee_id", ref_to("stakeholder"))
        .optional("depends_on", refs_to("task"))
        .optional("priority", FieldKind::one_of(PRIORITIES))
        .optional("estimate_hours", FieldKind::Number)
        .optional("tags", FieldKind::StringList)
        .optional("due", FieldKind::Timestamp)
        .status(WORK_STATUSES)
        .transitions(work_item_transitions())
        .embeddable()
        .build();

    let decision = EntitySchema::builder("decision", "decisions")
        .required("title", FieldKind::String)
        .optional("context", FieldKind::Text)
        .optional("decision", FieldKind::Text)
        .optional("consequences", FieldKind::Text)
        .optional("alternatives", FieldKind::StringList)
        .optional("epic_id", ref_to("epic"))
        .optional("supersedes", ref_to("decision"))
        .optional("decided_at", FieldKind::Timestamp)
        .status(["proposed", "accepted", "rejected", "superseded"])
        .transitions(
            TransitionTable::new()
                .allow("proposed", "accepted")
                .allow("proposed", "rejected")
                .allow("accepted", "superseded"),
        )
        .embeddable()
        .build();

    let risk = EntitySchema::builder("risk", "risks")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .required("likelihood", FieldKind::one_of(LEVELS))
        .required("impact", FieldKind::one_of(LEVELS))
        .optional("mitigation", FieldKind::Text)
        .optional("owner_id", ref_to("stakeholder"))
        .optional("project_id", ref_to("project"))
        .status(["open", "mitigating", "closed", "accepted"])
        .transitions(
            TransitionTable::new()
                .allow("open", "mitigating")
                .allow("open", "accepted")
                .allow("mitigating", "closed")
                .allow("mitigating", "open")
                .allow("accepted", "open")
                .allow("closed", "open"),
        )
        .embeddable()
        .build();

    let issue = EntitySchema::builder("issue", "issues")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .required("severity", FieldKind::one_of(PRIORITIES))
        .optional("task_id", ref_to("task"))
        .optional("reporter_id", ref_to("stakeholder"))
        .status(["open", "triaged", "resolved", "wont_fix"])
        .transitions(
            TransitionTable::new()
                .allow("open", "triaged")
                .allow("open", "wont_fix")
                .allow("triaged", "resolved")
                .allow("triaged", "wont_fix")
                .allow("resolved", "open"),
        )
        .embeddable()
        .build();

    let requirement = EntitySchema::builder("requirement", "requirements")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .optional("acceptance_criteria", FieldKind::StringList)
        .optional("epic_id", ref_to("epic"))
        .optional("priority", FieldKind::one_of(PRIORITIES))
        .status(["draft", "approved", "implemented", "verified"])
        .transitions(
            TransitionTable::new()
                .allow("draft", "approved")
                .allow("approved", "draft")
                .allow_if("approved", "implemented", DEPENDENCIES_DONE)
                .allow_if("implemented", "verified", ACCEPTANCE_MET)
                .allow("implemented", "approved"),
        )
        .embeddable()
        .build();

    let stakeholder = EntitySchema::builder("stakeholder", "stakeholders")
        .required("name", FieldKind::String)
        .optional("role", FieldKind::Text)
        .optional("email", FieldKind::String)
        .build();

    let meeting = EntitySchema::builder("meeting", "meetings")
        .required("title", FieldKind::String)
        .required("held_at", FieldKind::Timestamp)
        .optional("summary", FieldKind::Text)
        .optional("attendee_ids", refs_to("stakeholder"))
        .optional("decision_ids", refs_to("decision"))
        .embeddable()
        .build();

    let action_item = EntitySchema::builder("action_item", "action_items")
        .required("description", FieldKind::String)
        .required("meeting_id", ref_to("meeting"))
        .optional("owner_id", ref_to("stakeholder"))
        .optional("due", FieldKind::Timestamp)
        .status(["open", "done", "dropped"])
        .transitions(
            TransitionTable::new()
                .allow("open", "done")
                .allow("open", "dropped")
                .allow("done", "open"),
        )
        .build();

    let assumption = EntitySchema::builder("assumption", "assumptions")
        .required("statement", FieldKind::String)
        .optional("rationale", FieldKind::Text)
        .optional("validated", FieldKind::Boolean)
        .optional("risk_ids", refs_to("risk"))
        .embeddable()
        .build();

    let lesson = EntitySchema::builder("lesson", "lessons")
        .required("title", FieldKind::String)
        .optional("what_happened", FieldKind::Text)
        .optional("takeaway", FieldKind::Text)
        .optional("project_id", ref_to("project"))
        .embeddable()
        .build();

    let note = EntitySchema::builder("note", "notes")
        .required("body", FieldKind::Text)
        .optional("title", FieldKind::Text)
        .optional("tags", FieldKind::StringList)
        .optional("subject_type", FieldKind::String)
        .optional("subject_id", FieldKind::String)
        .embeddable()
        .build();

    let builder = delivery_schemas()
        .into_iter()
        .chain(planning_schemas())
        .fold(SchemaRegistry::builder(), |b, schema| b.entity(schema));

    builder
        .entity(project)
        .entity(milestone)
        .entity(epic)
        .entity(task)
        .entity(decision)
        .entity(risk)
        .entity(issue)
        .entity(requirement)
        .entity(stakeholder)
        .entity(meeting)
        .entity(action_item)
        .entity(assumption)
        .entity(lesson)
        .entity(note)
        .relationship(Relationship::new("milestone", "project_id", "project").required())
        .relationship(
            Relationship::new("action_item", "meeting_id", "meeting")
                .with_cardinality(Cardinality::ManyToOne)
                .required(),
        )
        .relationship(
            Relationship::new("task", "depends_on", "task").with_cardinality(Cardinality::ManyToMany),
        )
        .infer_relationships()
        .build()
}

// ── Delivery ────────────────────────────────────────────────────────────

/// Sprints, releases and the work items that ship in them.
fn delivery_schemas() -> Vec<EntitySchema> {
    let sprint = EntitySchema::builder("sprint", "sprints")
        .required("name", FieldKind::String)
        .optional("goal", FieldKind::Text)
        .optional("project_id", ref_to("project"))
        .optional("starts_at", FieldKind::Timestamp)
        .optional("ends_at", FieldKind::Timestamp)
        .optional("task_ids", refs_to("task"))
        .status(["planned", "active", "closed"])
        .transitions(
            TransitionTable::new()
                .allow("planned", "active")
                .allow_if("active", "closed", CHILDREN_DONE)
                .allow("closed", "active"),
        )
        .build();

    let release = EntitySchema::builder("release", "releases")
        .required("title", FieldKind::String)
        .required("version", FieldKind::String)
        .optional("notes", FieldKind::Text)
        .optional("project_id", ref_to("project"))
        .optional("milestone_id", ref_to("milestone"))
        .optional("released_at", FieldKind::Timestamp)
        .status(["planned", "in_progress", "released", "cancelled"])
        .transitions(
            TransitionTable::new()
                .allow("planned", "in_progress")
                .allow("planned", "cancelled")
                .allow_if("in_progress", "released", ACCEPTANCE_MET)
                .allow("in_progress", "cancelled"),
        )
        .embeddable()
        .build();

    let feature = EntitySchema::builder("feature", "features")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .optional("epic_id", ref_to("epic"))
        .optional("release_id", ref_to("release"))
        .optional("priority", FieldKind::one_of(PRIORITIES))
        .status(["draft", "active", "done", "cancelled"])
        .transitions(
            TransitionTable::new()
                .allow("draft", "active")
                .allow("draft", "cancelled")
                .allow_if("active", "done", CHILDREN_DONE)
                .allow("active", "cancelled")
                .allow("done", "active"),
        )
        .embeddable()
        .build();

    let user_story = EntitySchema::builder("user_story", "user_stories")
        .required("title", FieldKind::String)
        .optional("as_a", FieldKind::Text)
        .optional("i_want", FieldKind::Text)
        .optional("so_that", FieldKind::Text)
        .optional("acceptance_criteria", FieldKind::StringList)
        .optional("feature_id", ref_to("feature"))
        .optional("sprint_id", ref_to("sprint"))
        .optional("story_points", FieldKind::Integer)
        .status(WORK_STATUSES)
        .transitions(work_item_transitions())
        .embeddable()
        .build();

    let dependency = EntitySchema::builder("dependency", "dependencies")
        .required("task_id", ref_to("task"))
        .required("depends_on_id", ref_to("task"))
        .required("kind", FieldKind::one_of(["hard", "soft"]))
        .optional("notes", FieldKind::Text)
        .status(["open", "satisfied", "broken"])
        .transitions(
            TransitionTable::new()
                .allow("open", "satisfied")
                .allow("open", "broken")
                .allow("broken", "open")
                .allow("satisfied", "open"),
        )
        .build();

    let deliverable = EntitySchema::builder("deliverable", "deliverables")
        .required("title", FieldKind::String)
        .optional("milestone_id", ref_to("milestone"))
        .optional("owner_id", ref_to("stakeholder"))
        .optional("due", FieldKind::Timestamp)
        .status(["pending", "submitted", "accepted", "rejected"])
        .transitions(
            TransitionTable::new()
                .allow("pending", "submitted")
                .allow_if("submitted", "accepted", ACCEPTANCE_MET)
                .allow("submitted", "rejected")
                .allow("rejected", "submitted"),
        )
        .build();

    let test_case = EntitySchema::builder("test_case", "test_cases")
        .required("title", FieldKind::String)
        .required("requirement_id", ref_to("requirement"))
        .optional("steps", FieldKind::StringList)
        .optional("expected", FieldKind::Text)
        .status(["not_run", "passing", "failing"])
        .transitions(
            TransitionTable::new()
                .allow("not_run", "passing")
                .allow("not_run", "failing")
                .allow("passing", "failing")
                .allow("failing", "passing"),
        )
        .build();

    let retrospective = EntitySchema::builder("retrospective", "retrospectives")
        .required("title", FieldKind::String)
        .optional("sprint_id", ref_to("sprint"))
        .optional("held_at", FieldKind::Timestamp)
        .optional("went_well", FieldKind::StringList)
        .optional("to_improve", FieldKind::StringList)
        .optional("lesson_ids", refs_to("lesson"))
        .embeddable()
        .build();

    vec![
        sprint,
        release,
        feature,
        user_story,
        dependency,
        deliverable,
        test_case,
        retrospective,
    ]
}

// ── Planning ────────────────────────────────────────────────────────────

/// Goals, constraints, people and reference material around the work.
fn planning_schemas() -> Vec<EntitySchema> {
    let objective = EntitySchema::builder("objective", "objectives")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .optional("project_id", ref_to("project"))
        .status(["proposed", "active", "achieved", "abandoned"])
        .transitions(
            TransitionTable::new()
                .allow("proposed", "active")
                .allow("proposed", "abandoned")
                .allow_if("active", "achieved", CHILDREN_DONE)
                .allow("active", "abandoned"),
        )
        .embeddable()
        .build();

    let key_result = EntitySchema::builder("key_result", "key_results")
        .required("title", FieldKind::String)
        .required("objective_id", ref_to("objective"))
        .optional("target", FieldKind::Number)
        .optional("current", FieldKind::Number)
        .optional("unit", FieldKind::String)
        .build();

    let change_request = EntitySchema::builder("change_request", "change_requests")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .optional("impact", FieldKind::Text)
        .optional("requester_id", ref_to("stakeholder"))
        .optional("requirement_ids", refs_to("requirement"))
        .status(["proposed", "approved", "rejected", "implemented"])
        .transitions(
            TransitionTable::new()
                .allow("proposed", "approved")
                .allow("proposed", "rejected")
                .allow_if("approved", "implemented", DEPENDENCIES_DONE),
        )
        .embeddable()
        .build();

    let constraint = EntitySchema::builder("constraint", "constraints")
        .required("title", FieldKind::String)
        .optional("description", FieldKind::Text)
        .required(
            "kind",
            FieldKind::one_of(["time", "budget", "scope", "technical", "regulatory"]),
        )
        .optional("project_id", ref_to("project"))
        .embeddable()
        .build();

    let budget_item = EntitySchema::builder("budget_item", "budget_items")
        .required("description", FieldKind::String)
        .required("amount", FieldKind::Number)
        .optional("currency", FieldKind::String)
        .optional("category", FieldKind::String)
        .optional("project_id", ref_to("project"))
        .build();

    let team = EntitySchema::builder("team", "teams")
        .required("name", FieldKind::String)
        .optional("description", FieldKind::Text)
        .optional("lead_id", ref_to("stakeholder"))
        .optional("member_ids", refs_to("stakeholder"))
        .build();

    let document = EntitySchema::builder("document", "documents")
        .required("title", FieldKind::String)
        .optional("url", FieldKind::String)
        .optional("summary", FieldKind::Text)
        .optional("tags", FieldKind::StringList)
        .optional("project_id", ref_to("project"))
        .embeddable()
        .build();

    let glossary_term = EntitySchema::builder("glossary_term", "glossary_terms")
        .required("term", FieldKind::String)
        .required("definition", FieldKind::Text)
        .optional("aliases", FieldKind::StringList)
        .embeddable()
        .build();

    vec![
        objective,
        key_result,
        change_request,
        constraint,
        budget_item,
        team,
        document,
        glossary_term,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Validator;
    use serde_json::json;

    #[test]
    fn test_project_registry_builds() {
        let registry = project_registry().unwrap();
        assert_eq!(registry.len(), 30);
        assert!(registry.entity("task").unwrap().embeddable);
        assert!(!registry.entity("stakeholder").unwrap().embeddable);

        let task_rels: Vec<_> = registry
            .relationships_from("task")
            .map(|r| r.from_field.as_str())
            .collect();
        assert!(task_rels.contains(&"epic_id"));
        assert!(task_rels.contains(&"assignee_id"));
        assert_eq!(task_rels.iter().filter(|f| **f == "depends_on").count(), 1);

        let milestone_project = registry
            .relationships_from("milestone")
            .find(|r| r.from_field == "project_id")
            .unwrap();
        assert!(!milestone_project.nullable);
    }

    #[test]
    fn test_delivery_and_planning_types() {
        let registry = project_registry().unwrap();
        for ty in ["release", "dependency", "retrospective", "objective", "glossary_term"] {
            assert!(registry.entity(ty).is_some(), "missing {ty}");
        }
        assert_eq!(registry.entity("dependency").unwrap().collection, "dependencies");

        let dependency_rels: Vec<_> = registry
            .relationships_from("dependency")
            .filter(|r| !r.nullable)
            .map(|r| r.from_field.as_str())
            .collect();
        assert_eq!(dependency_rels.len(), 2);

        let story = registry.transitions("user_story").unwrap();
        assert_eq!(
            story.find("in_progress", "review").unwrap().precondition.as_deref(),
            Some(DEPENDENCIES_DONE)
        );

        let release = registry.entity("release").unwrap();
        assert!(release.embeddable);
        let err = release
            .validate(&json!({"id": "R1", "title": "Spring", "status": "planned"}))
            .unwrap_err();
        assert_eq!(err.violations[0].field, "version");
    }

    #[test]
    fn test_task_transitions() {
        let registry = project_registry().unwrap();
        let table = registry.transitions("task").unwrap();
        assert!(table.allows("todo", "in_progress"));
        assert!(!table.allows("todo", "done"));
        assert_eq!(
            table.find("review", "done").unwrap().precondition.as_deref(),
            Some(ACCEPTANCE_MET)
        );
    }

    #[test]
    fn test_task_validation() {
        let registry = project_registry().unwrap();
        let task = registry.entity("task").unwrap();
        assert!(
            task.validate(&json!({
                "id": "T1",
                "title": "Draft schema",
                "status": "todo",
                "depends_on": ["T0"],
                "due": "2025-01-31T17:00:00Z"
            }))
            .is_ok()
        );
        let err = task.validate(&json!({"id": "T2"})).unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }
}
