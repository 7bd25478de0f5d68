//! Quality Gate Evaluator
//!
//! Pure structural checks over artifact files in a run directory. A missing
//! file is reported separately from a file that exists but has the wrong
//! shape, so callers can word the correction accordingly.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A structural rule over one generated file, relative to the run directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum QualityGate {
    /// Each section appears as a heading of any level or a bold `Label:` marker
    MarkdownSection { file: String, sections: Vec<String> },
    /// Lower-cased header line contains every column as a substring
    CsvColumns { file: String, columns: Vec<String> },
    /// Non-empty data lines, excluding the header, reach the minimum
    CsvMinRows { file: String, min_rows: usize },
}

impl QualityGate {
    pub fn file(&self) -> &str {
        match self {
            Self::MarkdownSection { file, .. } | Self::CsvColumns { file, .. } | Self::CsvMinRows { file, .. } => file,
        }
    }
}

/// Result of one gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Passed,
    MissingFile { file: String },
    Mismatch { file: String, reason: String },
}

impl GateOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn error(&self) -> Option<String> {
        match self {
            Self::Passed => None,
            Self::MissingFile { file } => Some(format!("Required artifact {} was not produced", file)),
            Self::Mismatch { file, reason } => Some(format!("Artifact {} failed validation: {}", file, reason)),
        }
    }
}

/// Check `gate` against the files under `run_dir`
pub fn validate(run_dir: &Path, gate: &QualityGate) -> GateOutcome {
    let path = run_dir.join(gate.file());
    debug!(?path, ?gate, "validate: called");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => {
            debug!("validate: file missing or unreadable");
            return GateOutcome::MissingFile {
                file: gate.file().to_string(),
            };
        }
    };

    let failure = match gate {
        QualityGate::MarkdownSection { sections, .. } => {
            let missing: Vec<&str> = sections
                .iter()
                .filter(|s| !has_section(&content, s))
                .map(String::as_str)
                .collect();
            (!missing.is_empty()).then(|| format!("missing sections: {}", missing.join(", ")))
        }
        QualityGate::CsvColumns { columns, .. } => {
            let header = content.lines().next().unwrap_or_default().to_lowercase();
            let missing: Vec<&str> = columns
                .iter()
                .filter(|c| !header.contains(&c.to_lowercase()))
                .map(String::as_str)
                .collect();
            (!missing.is_empty()).then(|| format!("missing columns: {}", missing.join(", ")))
        }
        QualityGate::CsvMinRows { min_rows, .. } => {
            let rows = content.lines().skip(1).filter(|l| !l.trim().is_empty()).count();
            (rows < *min_rows).then(|| format!("expected at least {} data rows, found {}", min_rows, rows))
        }
    };

    match failure {
        None => GateOutcome::Passed,
        Some(reason) => {
            debug!(%reason, "validate: mismatch");
            GateOutcome::Mismatch {
                file: gate.file().to_string(),
                reason,
            }
        }
    }
}

fn has_section(content: &str, section: &str) -> bool {
    let name = regex::escape(section.trim());
    let pattern = format!(r"(?im)^\s*(?:#{{1,6}}\s*{name}(?:\W|$)|\*\*{name}:?\*\*|\*\*{name}\*\*:)");
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(content),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_markdown_headings_and_bold_labels() {
        let temp = tempdir().unwrap();
        write(
            temp.path(),
            "plan.md",
            "# Plan\n\n### summary\ntext\n\n**Risks:** none\n**Next Steps**: ship\n",
        );
        let gate = QualityGate::MarkdownSection {
            file: "plan.md".to_string(),
            sections: vec!["Summary".to_string(), "Risks".to_string(), "Next Steps".to_string()],
        };
        assert_eq!(validate(temp.path(), &gate), GateOutcome::Passed);

        let gate = QualityGate::MarkdownSection {
            file: "plan.md".to_string(),
            sections: vec!["Budget".to_string()],
        };
        let outcome = validate(temp.path(), &gate);
        assert!(matches!(outcome, GateOutcome::Mismatch { ref reason, .. } if reason.contains("Budget")));
    }

    #[test]
    fn test_section_name_in_body_text_does_not_count() {
        let temp = tempdir().unwrap();
        write(temp.path(), "a.md", "We should write a summary later.\n");
        let gate = QualityGate::MarkdownSection {
            file: "a.md".to_string(),
            sections: vec!["summary".to_string()],
        };
        assert!(!validate(temp.path(), &gate).success());
    }

    #[test]
    fn test_csv_columns_case_insensitive_substring() {
        let temp = tempdir().unwrap();
        write(temp.path(), "leads.csv", "Name,Email Address,Company\nx,y,z\n");
        let gate = QualityGate::CsvColumns {
            file: "leads.csv".to_string(),
            columns: vec!["email".to_string(), "COMPANY".to_string()],
        };
        assert!(validate(temp.path(), &gate).success());

        let gate = QualityGate::CsvColumns {
            file: "leads.csv".to_string(),
            columns: vec!["phone".to_string()],
        };
        assert!(!validate(temp.path(), &gate).success());
    }

    #[test]
    fn test_csv_min_rows_ignores_header_and_blank_lines() {
        let temp = tempdir().unwrap();
        write(temp.path(), "rows.csv", "a,b\n1,2\n\n3,4\n   \n");
        let gate = QualityGate::CsvMinRows {
            file: "rows.csv".to_string(),
            min_rows: 2,
        };
        assert!(validate(temp.path(), &gate).success());

        let gate = QualityGate::CsvMinRows {
            file: "rows.csv".to_string(),
            min_rows: 5,
        };
        let outcome = validate(temp.path(), &gate);
        assert_eq!(
            outcome.error().unwrap(),
            "Artifact rows.csv failed validation: expected at least 5 data rows, found 2"
        );
    }

    #[test]
    fn test_missing_file_is_distinct() {
        let temp = tempdir().unwrap();
        let gate = QualityGate::CsvMinRows {
            file: "absent.csv".to_string(),
            min_rows: 1,
        };
        let outcome = validate(temp.path(), &gate);
        assert_eq!(
            outcome,
            GateOutcome::MissingFile {
                file: "absent.csv".to_string()
            }
        );
        assert!(outcome.error().unwrap().contains("not produced"));
    }

    #[test]
    fn test_gate_yaml_shape() {
        let yaml = "- kind: csv-min-rows\n  file: leads.csv\n  min-rows: 5\n- kind: markdown-section\n  file: plan.md\n  sections: [Summary]\n";
        let gates: Vec<QualityGate> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(gates[0].file(), "leads.csv");
        assert!(matches!(gates[1], QualityGate::MarkdownSection { .. }));
    }
}
