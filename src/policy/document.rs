//! IAM policy documents

use super::statement::PolicyStatement;
use anyhow::{Context, Result};
use serde::Serialize;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statements: PolicyStatement::merge_all(statements),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize policy document to JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_json() {
        let document = PolicyDocument::new(vec![
            PolicyStatement::allow(["sns:Publish"], ["arn:aws:sns:us-east-1:1:approvals"]),
        ]);
        let json: serde_json::Value = serde_json::from_str(&document.to_json().unwrap()).unwrap();
        assert_eq!(json["Version"], "2012-10-17");
        assert_eq!(json["Statement"][0]["Action"][0], "sns:Publish");
    }

    #[test]
    fn test_document_merges_statements() {
        let document = PolicyDocument::new(vec![
            PolicyStatement::allow(["s3:GetObject"], ["arn:aws:s3:::b/*"]),
            PolicyStatement::allow(["s3:PutObject"], ["arn:aws:s3:::b/*"]),
        ]);
        assert_eq!(document.statements.len(), 1);
        assert!(!document.is_empty());
    }
}
