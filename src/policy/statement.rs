//! IAM permission statements

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;

/// Wildcard resource, only produced by the global actions in [`super::global`].
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
}

/// Whether a statement is scoped to named resources or deliberately global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementScope {
    Scoped,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub operator: String,
    pub key: String,
    pub values: Vec<String>,
}

impl Condition {
    pub fn new(operator: impl Into<String>, key: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            operator: operator.into(),
            key: key.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    pub sid: Option<String>,
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub conditions: Vec<Condition>,
    pub scope: StatementScope,
}

impl PolicyStatement {
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            sid: None,
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
            conditions: Vec::new(),
            scope: StatementScope::Scoped,
        }
    }

    pub(crate) fn global<A>(actions: A) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            scope: StatementScope::Global,
            ..Self::allow(actions, [WILDCARD])
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn is_global(&self) -> bool {
        self.scope == StatementScope::Global
    }

    /// True when any resource is the bare `*`.
    pub fn is_wildcard(&self) -> bool {
        self.resources.iter().any(|r| r == WILDCARD)
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    /// Removes duplicate actions and resources and sorts both.
    pub fn normalized(mut self) -> Self {
        self.actions = sorted_unique(self.actions);
        self.resources = sorted_unique(self.resources);
        self
    }

    /// Merges statements that share effect, resources, conditions and scope.
    pub fn merge_all(statements: Vec<PolicyStatement>) -> Vec<PolicyStatement> {
        let mut merged: Vec<PolicyStatement> = Vec::new();
        for statement in statements.into_iter().map(PolicyStatement::normalized) {
            let existing = merged.iter_mut().find(|m| {
                m.effect == statement.effect
                    && m.resources == statement.resources
                    && m.conditions == statement.conditions
                    && m.scope == statement.scope
                    && m.sid == statement.sid
            });
            match existing {
                Some(target) => {
                    target.actions.extend(statement.actions);
                    target.actions = sorted_unique(std::mem::take(&mut target.actions));
                }
                None => merged.push(statement),
            }
        }
        merged
    }
}

fn sorted_unique(values: Vec<String>) -> Vec<String> {
    values.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

struct ConditionBlock<'a>(&'a [Condition]);

impl Serialize for ConditionBlock<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut by_operator: indexmap::IndexMap<&str, indexmap::IndexMap<&str, &Vec<String>>> =
            indexmap::IndexMap::new();
        for condition in self.0 {
            by_operator
                .entry(condition.operator.as_str())
                .or_default()
                .insert(condition.key.as_str(), &condition.values);
        }
        let mut map = serializer.serialize_map(Some(by_operator.len()))?;
        for (operator, keys) in &by_operator {
            map.serialize_entry(operator, keys)?;
        }
        map.end()
    }
}

impl Serialize for PolicyStatement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        if let Some(sid) = &self.sid {
            map.serialize_entry("Sid", sid)?;
        }
        map.serialize_entry("Effect", &self.effect)?;
        map.serialize_entry("Action", &self.actions)?;
        map.serialize_entry("Resource", &self.resources)?;
        if !self.conditions.is_empty() {
            map.serialize_entry("Condition", &ConditionBlock(&self.conditions))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_is_scoped() {
        let statement = PolicyStatement::allow(["s3:GetObject"], ["arn:aws:s3:::app*"]);
        assert_eq!(statement.effect, Effect::Allow);
        assert_eq!(statement.scope, StatementScope::Scoped);
        assert!(!statement.is_wildcard());
        assert!(statement.has_action("s3:GetObject"));
    }

    #[test]
    fn test_global_is_wildcard() {
        let statement = PolicyStatement::global(["ecr:GetAuthorizationToken"]);
        assert!(statement.is_global());
        assert!(statement.is_wildcard());
        assert_eq!(statement.resources, vec!["*"]);
    }

    #[test]
    fn test_normalized_sorts_and_dedupes() {
        let statement = PolicyStatement::allow(
            ["s3:PutObject", "s3:GetObject", "s3:PutObject"],
            ["b", "a", "a"],
        )
        .normalized();
        assert_eq!(statement.actions, vec!["s3:GetObject", "s3:PutObject"]);
        assert_eq!(statement.resources, vec!["a", "b"]);
    }

    #[test]
    fn test_merge_all_combines_same_resources() {
        let merged = PolicyStatement::merge_all(vec![
            PolicyStatement::allow(["s3:GetObject"], ["arn:aws:s3:::app*"]),
            PolicyStatement::allow(["s3:PutObject"], ["arn:aws:s3:::app*"]),
            PolicyStatement::allow(["sqs:SendMessage"], ["arn:aws:sqs:us-east-1:1:app*"]),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].actions, vec!["s3:GetObject", "s3:PutObject"]);
    }

    #[test]
    fn test_merge_keeps_global_separate() {
        let merged = PolicyStatement::merge_all(vec![
            PolicyStatement::allow(["logs:DescribeLogGroups"], ["*"]),
            PolicyStatement::global(["ecr:GetAuthorizationToken"]),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_serialize_iam_shape() {
        let statement = PolicyStatement::allow(["route53:ChangeResourceRecordSets"], ["arn:zone"])
            .with_sid("RecordSets")
            .with_condition(Condition::new(
                "ForAllValues:StringLike",
                "route53:ChangeResourceRecordSetsNormalizedRecordNames",
                vec!["app*".to_string()],
            ));
        let json = serde_json::to_value(&statement).unwrap();
        assert_eq!(json["Sid"], "RecordSets");
        assert_eq!(json["Effect"], "Allow");
        assert_eq!(json["Action"][0], "route53:ChangeResourceRecordSets");
        assert_eq!(json["Resource"][0], "arn:zone");
        assert_eq!(
            json["Condition"]["ForAllValues:StringLike"]
                ["route53:ChangeResourceRecordSetsNormalizedRecordNames"][0],
            "app*"
        );
    }

    #[test]
    fn test_serialize_omits_empty_condition() {
        let statement = PolicyStatement::allow(["sns:Publish"], ["arn:topic"]);
        let json = serde_json::to_value(&statement).unwrap();
        assert!(json.get("Condition").is_none());
        assert!(json.get("Sid").is_none());
    }
}
