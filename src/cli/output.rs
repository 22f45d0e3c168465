//! Output formatting for JSON, YAML and human-readable text

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;

use crate::annotations::Annotation;
use crate::output::schema::PipelineDefinition;
use crate::policy::PolicyDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Human,
}

/// Outcome of `validate`: rule failures plus the annotations composition
/// attached to stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub pipeline: String,
    pub fingerprint: String,
    pub rule_failures: Vec<String>,
    pub annotations: Vec<Annotation>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.rule_failures.is_empty() && !self.annotations.iter().any(Annotation::is_blocking)
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_pipeline(&self, pipeline: &PipelineDefinition) -> Result<String> {
        match self.format {
            OutputFormat::Json => pipeline.to_json(),
            OutputFormat::Yaml => pipeline.to_yaml(),
            OutputFormat::Human => Ok(pipeline.to_string()),
        }
    }

    pub fn format_policy(&self, document: &PolicyDocument) -> Result<String> {
        match self.format {
            OutputFormat::Json => document.to_json(),
            OutputFormat::Yaml => {
                serde_yaml::to_string(document).context("Failed to serialize policy to YAML")
            }
            OutputFormat::Human => Ok(self.format_policy_human(document)),
        }
    }

    pub fn format_report(&self, report: &ValidationReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .context("Failed to serialize validation report to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(report).context("Failed to serialize validation report to YAML")
            }
            OutputFormat::Human => Ok(self.format_report_human(report)),
        }
    }

    fn format_policy_human(&self, document: &PolicyDocument) -> String {
        let mut output = String::new();
        for (index, statement) in document.statements.iter().enumerate() {
            let _ = writeln!(
                output,
                "Statement {}{}",
                index + 1,
                if statement.is_global() { " (global)" } else { "" }
            );
            let _ = writeln!(output, "  Actions:");
            for action in &statement.actions {
                let _ = writeln!(output, "    {}", action);
            }
            let _ = writeln!(output, "  Resources:");
            for resource in &statement.resources {
                let _ = writeln!(output, "    {}", resource);
            }
            for condition in &statement.conditions {
                let _ = writeln!(
                    output,
                    "  Condition: {} {} {}",
                    condition.operator,
                    condition.key,
                    condition.values.join(", ")
                );
            }
        }
        output
    }

    fn format_report_human(&self, report: &ValidationReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Pipeline: {}", report.pipeline);
        let _ = writeln!(output, "Fingerprint: {}", report.fingerprint);

        if report.rule_failures.is_empty() {
            let _ = writeln!(output, "Rules: all passed");
        } else {
            let _ = writeln!(output, "Rule failures:");
            for failure in &report.rule_failures {
                let _ = writeln!(output, "  {}", failure);
            }
        }
        if !report.annotations.is_empty() {
            let _ = writeln!(output, "Annotations:");
            for annotation in &report.annotations {
                let _ = writeln!(output, "  {}", annotation);
            }
        }
        let _ = writeln!(
            output,
            "Result: {}",
            if report.passed() { "OK" } else { "FAILED" }
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{global, GlobalAction, PolicyStatement};

    fn document() -> PolicyDocument {
        PolicyDocument::new(vec![
            PolicyStatement::allow(["s3:GetObject"], ["arn:aws:s3:::marble-test*"]),
            global::statement(&[GlobalAction::EcrAuth]),
        ])
    }

    fn report(annotations: Vec<Annotation>) -> ValidationReport {
        ValidationReport {
            pipeline: "marble-pipeline".to_string(),
            fingerprint: "abc".to_string(),
            rule_failures: vec![],
            annotations,
        }
    }

    #[test]
    fn test_policy_formats() {
        let json = OutputFormatter::new(OutputFormat::Json)
            .format_policy(&document())
            .unwrap();
        assert!(json.contains("\"Version\": \"2012-10-17\""));

        let yaml = OutputFormatter::new(OutputFormat::Yaml)
            .format_policy(&document())
            .unwrap();
        assert!(yaml.contains("Statement:"));

        let human = OutputFormatter::new(OutputFormat::Human)
            .format_policy(&document())
            .unwrap();
        assert!(human.contains("Statement 2 (global)"));
        assert!(human.contains("    arn:aws:s3:::marble-test*"));
    }

    #[test]
    fn test_report_passed() {
        assert!(report(vec![Annotation::warning("Migrate", "no script")]).passed());
        assert!(!report(vec![Annotation::error("rails-build", "no dockerfile")]).passed());

        let mut failing = report(vec![]);
        failing.rule_failures.push("[RunOrder] bad".to_string());
        assert!(!failing.passed());

        let human = OutputFormatter::new(OutputFormat::Human)
            .format_report(&failing)
            .unwrap();
        assert!(human.contains("[RunOrder] bad"));
        assert!(human.ends_with("Result: FAILED\n"));
    }

    #[test]
    fn test_report_json() {
        let json = OutputFormatter::new(OutputFormat::Json)
            .format_report(&report(vec![]))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["pipeline"], "marble-pipeline");
        assert!(value["rule_failures"].as_array().unwrap().is_empty());
    }
}
