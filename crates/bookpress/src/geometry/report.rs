//! Bleed validation report attached to every compilation job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::book::BookSize;

/// Page edge an item crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Left,
    Top,
    Right,
    Bottom,
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Edge::Left => "left",
            Edge::Top => "top",
            Edge::Right => "right",
            Edge::Bottom => "bottom",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A single item crossing a zone boundary on one edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemWarning {
    pub item_id: String,
    pub edge: Edge,
    pub severity: Severity,
    /// Print pixels the item reaches past the boundary (positive = into the zone).
    pub distance_px: f64,
    pub message: String,
}

/// Validation results for one page. Present even when no item was flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageWarning {
    pub page_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub warnings: Vec<ItemWarning>,
}

impl PageWarning {
    pub fn critical_count(&self) -> usize {
        self.count(Severity::Critical)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn has_issues(&self) -> bool {
        self.critical_count() > 0 || self.warning_count() > 0
    }

    fn count(&self, severity: Severity) -> usize {
        self.warnings
            .iter()
            .filter(|w| w.severity == severity)
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub pages_checked: usize,
    pub pages_with_issues: usize,
    pub total_critical: usize,
    pub total_warnings: usize,
    pub critical_page_ids: Vec<String>,
}

/// Record of a user explicitly proceeding past validation issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub proceeded: bool,
    pub acknowledged_by: String,
    pub acknowledged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BleedValidationReport {
    pub book_size: BookSize,
    pub pages: Vec<PageWarning>,
    pub summary: ValidationSummary,
    pub can_proceed: bool,
    pub should_block: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledgement: Option<Acknowledgement>,
}

impl BleedValidationReport {
    /// Builds the report and its aggregate fields from per-page results.
    pub fn from_pages(book_size: BookSize, pages: Vec<PageWarning>) -> Self {
        let mut summary = ValidationSummary {
            pages_checked: pages.len(),
            ..Default::default()
        };

        for page in &pages {
            let critical = page.critical_count();
            summary.total_critical += critical;
            summary.total_warnings += page.warning_count();
            if page.has_issues() {
                summary.pages_with_issues += 1;
            }
            if critical > 0 {
                summary.critical_page_ids.push(page.page_id.clone());
            }
        }

        let can_proceed = summary.total_critical == 0;
        let message = summary_message(&summary);

        Self {
            book_size,
            pages,
            summary,
            can_proceed,
            should_block: !can_proceed,
            message,
            acknowledgement: None,
        }
    }

    /// Records that `user` chose to proceed despite the reported issues.
    pub fn acknowledge(&mut self, user: &str, at: DateTime<Utc>) {
        self.acknowledgement = Some(Acknowledgement {
            proceeded: true,
            acknowledged_by: user.to_string(),
            acknowledged_at: at,
        });
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledgement.as_ref().is_some_and(|a| a.proceeded)
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{} {}", n, one)
    } else {
        format!("{} {}", n, many)
    }
}

/// Human summary derived only from the counts.
fn summary_message(summary: &ValidationSummary) -> String {
    if summary.total_critical > 0 {
        format!(
            "{} on {} will be cut off when the book is trimmed. Move them inside the safe area or confirm to print anyway.",
            plural(summary.total_critical, "item", "items"),
            plural(summary.critical_page_ids.len(), "page", "pages"),
        )
    } else if summary.total_warnings > 0 {
        format!(
            "{} sit close to the trim edge on {}. They will print, but may look tight.",
            plural(summary.total_warnings, "item", "items"),
            plural(summary.pages_with_issues, "page", "pages"),
        )
    } else {
        format!(
            "All {} passed the print safety check.",
            plural(summary.pages_checked, "page", "pages")
        )
    }
}
