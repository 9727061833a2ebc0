use std::fmt;

use thiserror::Error;

/// Engine counters reported at the end of an analysis.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Counters {
    pub(crate) bug_count: Option<u64>,
    pub(crate) error_count: Option<u64>,
    pub(crate) missing_class_count: Option<u64>,
}

impl Counters {
    pub(crate) fn has_errors(&self) -> bool {
        self.error_count.is_some_and(|count| count > 0)
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut written = false;
        if let Some(count) = self.error_count.filter(|count| *count > 0) {
            write!(f, "{count} SpotBugs errors were found.")?;
            written = true;
        }
        if let Some(count) = self.bug_count.filter(|count| *count > 0) {
            if written {
                f.write_str(" ")?;
            }
            write!(f, "{count} SpotBugs violations were found.")?;
        }
        Ok(())
    }
}

/// Structured outcome of a unit that did not complete cleanly.
#[derive(Debug, Error)]
pub(crate) enum Failure {
    #[error(
        "Verification failed: SpotBugs ended with exit code {} in {unit}.{}{}",
        exit_code_text(.exit_code),
        counters_text(.counters),
        report_hint(.reports)
    )]
    AnalysisFailedWithBugs {
        unit: String,
        exit_code: Option<i32>,
        counters: Counters,
        reports: Vec<String>,
    },
    #[error(
        "Verification failed: SpotBugs execution failed with exit code {} in {unit}.{}{}{}",
        exit_code_text(.exit_code),
        counters_text(.counters),
        detail_text(.detail),
        report_hint(.reports)
    )]
    AnalysisErrored {
        unit: String,
        exit_code: Option<i32>,
        counters: Counters,
        detail: Option<String>,
        reports: Vec<String>,
    },
    #[error("SpotBugs reported missing classes only in {unit} (exit code {exit_code})")]
    MissingClassesOnly { unit: String, exit_code: i32 },
    #[error(
        "SpotBugs analysis succeeded but report generation failed in {unit}.{}",
        report_hint(.reports)
    )]
    HtmlReportGenerationFailed { unit: String, reports: Vec<String> },
    #[error("invalid SpotBugs configuration for {unit}: {reason}")]
    ConfigurationInvalid { unit: String, reason: String },
    #[error("could not prepare SpotBugs execution for {unit}")]
    Setup {
        unit: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("SpotBugs execution for {unit} was cancelled")]
    Cancelled { unit: String },
}

impl Failure {
    pub(crate) fn configuration(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigurationInvalid {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unit(&self) -> &str {
        match self {
            Self::AnalysisFailedWithBugs { unit, .. }
            | Self::AnalysisErrored { unit, .. }
            | Self::MissingClassesOnly { unit, .. }
            | Self::HtmlReportGenerationFailed { unit, .. }
            | Self::ConfigurationInvalid { unit, .. }
            | Self::Setup { unit, .. }
            | Self::Cancelled { unit } => unit,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::AnalysisFailedWithBugs { .. } => "AnalysisFailedWithBugs",
            Self::AnalysisErrored { .. } => "AnalysisErrored",
            Self::MissingClassesOnly { .. } => "MissingClassesOnly",
            Self::HtmlReportGenerationFailed { .. } => "HtmlReportGenerationFailed",
            Self::ConfigurationInvalid { .. } => "ConfigurationInvalid",
            Self::Setup { .. } => "Setup",
            Self::Cancelled { .. } => "Cancelled",
        }
    }

    /// Whether `ignoreFailures` may downgrade this failure to a warning.
    pub(crate) fn is_ignorable(&self) -> bool {
        matches!(
            self,
            Self::AnalysisFailedWithBugs { .. } | Self::AnalysisErrored { .. }
        )
    }
}

fn exit_code_text(exit_code: &Option<i32>) -> String {
    exit_code.map_or_else(|| "<none>".to_string(), |code| code.to_string())
}

fn counters_text(counters: &Counters) -> String {
    let text = counters.to_string();
    if text.is_empty() {
        text
    } else {
        format!(" {text}")
    }
}

fn detail_text(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|detail| format!(" {detail}"))
        .unwrap_or_default()
}

pub(crate) fn report_hint(reports: &[String]) -> String {
    if reports.is_empty() {
        return String::new();
    }
    format!(" See the report at: {}", reports.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_with_bugs_message_lists_exit_code_and_reports() {
        let failure = Failure::AnalysisFailedWithBugs {
            unit: "spotbugsMain".to_string(),
            exit_code: Some(1),
            counters: Counters::default(),
            reports: vec!["file:///tmp/spotbugs/spotbugsMain.html".to_string()],
        };

        let message = failure.to_string();

        assert!(message.contains("exit code 1"));
        assert!(message.contains("spotbugsMain"));
        assert!(message.ends_with("See the report at: file:///tmp/spotbugs/spotbugsMain.html"));
    }

    #[test]
    fn counters_describe_errors_before_violations() {
        let counters = Counters {
            bug_count: Some(3),
            error_count: Some(2),
            missing_class_count: None,
        };

        assert_eq!(
            counters.to_string(),
            "2 SpotBugs errors were found. 3 SpotBugs violations were found."
        );
    }

    #[test]
    fn counters_skip_zero_values() {
        let counters = Counters {
            bug_count: Some(0),
            error_count: Some(0),
            missing_class_count: Some(4),
        };

        assert_eq!(counters.to_string(), "");
        assert!(!counters.has_errors());
    }

    #[test]
    fn html_failure_is_not_ignorable() {
        let failure = Failure::HtmlReportGenerationFailed {
            unit: "spotbugsTest".to_string(),
            reports: Vec::new(),
        };

        assert!(!failure.is_ignorable());
        assert_eq!(failure.kind(), "HtmlReportGenerationFailed");
        assert_eq!(failure.unit(), "spotbugsTest");
    }
}
