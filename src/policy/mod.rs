//! Least-privilege permission generation
//!
//! - [`namespaced`]: statements scoped to resources named after a namespace
//! - [`global`]: the enumerated actions that must use `*`
//! - [`statement`] / [`document`]: the IAM statement and document model

pub mod document;
pub mod global;
pub mod namespaced;
pub mod statement;

pub use document::PolicyDocument;
pub use global::GlobalAction;
pub use namespaced::{Capability, Scope};
pub use statement::{Condition, Effect, PolicyStatement, StatementScope};

use serde::{Deserialize, Serialize};

/// Account and region that resource ARNs are built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsEnv {
    pub account: String,
    pub region: String,
}

impl AwsEnv {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }

    /// Registry host for the account, e.g. `123.dkr.ecr.us-east-1.amazonaws.com`.
    pub fn registry_host(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account, self.region)
    }

    pub fn stack_arn(&self, stack_name: &str) -> String {
        format!(
            "arn:aws:cloudformation:{}:{}:stack/{}/*",
            self.region, self.account, stack_name
        )
    }

    pub fn parameter_arn(&self, path: &str) -> String {
        format!(
            "arn:aws:ssm:{}:{}:parameter/{}",
            self.region,
            self.account,
            path.trim_start_matches('/')
        )
    }

    pub fn secret_arn(&self, secret_path: &str) -> String {
        format!(
            "arn:aws:secretsmanager:{}:{}:secret:{}*",
            self.region, self.account, secret_path
        )
    }

    pub fn repository_arn(&self, repository: &str) -> String {
        format!(
            "arn:aws:ecr:{}:{}:repository/{}",
            self.region, self.account, repository
        )
    }
}
