use serde::{Deserialize, Serialize};

/// Result of one compilation cycle.
///
/// A multi-target build reports one child per target and keeps its own
/// `errors`/`warnings` for problems that belong to no single target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// URL paths of the emitted files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Stats>,
}

impl Stats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.children.iter().any(Stats::has_errors)
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty() || self.children.iter().any(Stats::has_warnings)
    }

    /// Flatten this cycle and all children into one `{errors, warnings}` view.
    pub fn summary(&self) -> StatsSummary {
        let mut summary = StatsSummary::default();
        self.collect(&mut summary);
        summary
    }

    fn collect(&self, summary: &mut StatsSummary) {
        summary.errors.extend(self.errors.iter().cloned());
        summary.warnings.extend(self.warnings.iter().cloned());
        for child in &self.children {
            child.collect(summary);
        }
    }
}

/// Aggregate problems of a compilation, regardless of target count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StatsSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Which summary entries stop a cycle from counting as finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockingPolicy {
    /// Only errors block; warnings are reported and the build still finishes
    #[default]
    Errors,
    /// Warnings block as well
    ErrorsAndWarnings,
}

impl BlockingPolicy {
    pub fn is_blocking(&self, summary: &StatsSummary) -> bool {
        match self {
            BlockingPolicy::Errors => !summary.errors.is_empty(),
            BlockingPolicy::ErrorsAndWarnings => !summary.is_clean(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(name: &str, errors: &[&str], warnings: &[&str]) -> Stats {
        Stats {
            name: name.to_string(),
            errors: errors.iter().map(|s| s.to_string()).collect(),
            warnings: warnings.iter().map(|s| s.to_string()).collect(),
            ..Stats::default()
        }
    }

    #[test]
    fn test_summary_flattens_children() {
        let mut stats = Stats::new("multi");
        stats.children.push(child("client", &["client broke"], &[]));
        stats.children.push(child("server", &[], &["server slow"]));

        let summary = stats.summary();
        assert_eq!(summary.errors, vec!["client broke"]);
        assert_eq!(summary.warnings, vec!["server slow"]);
        assert!(stats.has_errors());
        assert!(stats.has_warnings());
    }

    #[test]
    fn test_clean_stats() {
        let stats = Stats::new("app");
        assert!(stats.summary().is_clean());
        assert!(!stats.has_errors());
    }

    #[test]
    fn test_blocking_policy() {
        let warnings_only = StatsSummary {
            errors: Vec::new(),
            warnings: vec!["unused".to_string()],
        };
        assert!(!BlockingPolicy::Errors.is_blocking(&warnings_only));
        assert!(BlockingPolicy::ErrorsAndWarnings.is_blocking(&warnings_only));

        let errors = StatsSummary {
            errors: vec!["syntax".to_string()],
            warnings: Vec::new(),
        };
        assert!(BlockingPolicy::Errors.is_blocking(&errors));
    }
}
