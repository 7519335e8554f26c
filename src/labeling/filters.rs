//! Filter and assignee-push payloads in the labeling service's wire format.

use serde::Serialize;
use serde_json::{Value, json};

use crate::model::{TaskId, is_all_languages};

/// One data-manager filter clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterItem {
    pub filter: String,
    pub operator: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FilterItem {
    fn new(filter: &str, operator: &str, value: Value, kind: &str) -> Self {
        Self {
            filter: filter.to_string(),
            operator: operator.to_string(),
            value,
            kind: kind.to_string(),
        }
    }
}

/// A conjunction of filter clauses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSet {
    pub conjunction: String,
    pub items: Vec<FilterItem>,
}

impl FilterSet {
    /// Tasks with zero annotations and nobody assigned, narrowed to
    /// `language` unless it is the "all" sentinel.
    pub fn unassigned(language: &str) -> Self {
        let mut items = vec![
            FilterItem::new("filter:tasks:total_annotations", "equal", json!(0), "Number"),
            FilterItem::new("filter:tasks:annotators", "empty", json!(true), "List"),
        ];
        if !is_all_languages(language) {
            items.push(FilterItem::new(
                "filter:tasks:data.language",
                "equal",
                json!(language),
                "String",
            ));
        }
        Self {
            conjunction: "and".to_string(),
            items,
        }
    }

    /// Body for the view update request.
    pub fn view_body(&self, project_id: i64) -> Value {
        json!({
            "project": project_id,
            "data": { "filters": self },
        })
    }
}

/// Explicit task selection for a bulk action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedItems {
    pub all: bool,
    pub included: Vec<TaskId>,
}

/// Body of the assignee mutation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssigneePush {
    /// Assignment kind; `AN` = annotator.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "selectedItems")]
    pub selected_items: SelectedItems,
    pub users: Vec<i64>,
    pub filters: FilterSet,
}

impl AssigneePush {
    /// Assign `task_ids` to a single annotator.
    pub fn annotator(user_id: i64, task_ids: &[TaskId], language: &str) -> Self {
        Self {
            kind: "AN".to_string(),
            selected_items: SelectedItems {
                all: false,
                included: task_ids.to_vec(),
            },
            users: vec![user_id],
            filters: FilterSet::unassigned(language),
        }
    }
}
