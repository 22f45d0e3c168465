//! Values that only exist once a pipeline execution runs
//!
//! Commit ids, commit messages and the image tags derived from them are not
//! known when the pipeline is composed. [`Deferred`] keeps them symbolic: at
//! composition time the only thing you can get out of one is its placeholder
//! token (`#{Namespace.Variable}`), which the workflow engine substitutes when
//! the execution reaches the step. A concrete string requires
//! [`Deferred::resolve`] with the variables of an actual execution.

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeferredError {
    #[error("Variable '{namespace}.{name}' has not been produced by the execution")]
    Unresolved { namespace: String, name: String },
}

/// Reference to a variable emitted by a step's variables namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableRef {
    pub namespace: String,
    pub name: String,
}

impl VariableRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn placeholder(&self) -> String {
        format!("#{{{}.{}}}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(VariableRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred {
    segments: Vec<Segment>,
}

impl Deferred {
    pub fn variable(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Variable(VariableRef::new(namespace, name))],
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Literal(value.into())],
        }
    }

    /// Returns `prefix` followed by this value.
    pub fn prefixed(mut self, prefix: impl Into<String>) -> Self {
        self.segments.insert(0, Segment::Literal(prefix.into()));
        self.normalize();
        self
    }

    /// Returns this value followed by `suffix`.
    pub fn suffixed(mut self, suffix: impl Into<String>) -> Self {
        self.segments.push(Segment::Literal(suffix.into()));
        self.normalize();
        self
    }

    /// Token understood by the workflow engine, e.g. `rails-#{AppCode.CommitId}`.
    pub fn placeholder(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Variable(var) => var.placeholder(),
            })
            .collect()
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableRef> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Variable(var) => Some(var),
            Segment::Literal(_) => None,
        })
    }

    /// True when the value contains no execution-time variables.
    pub fn is_static(&self) -> bool {
        self.variables().next().is_none()
    }

    pub fn resolve(&self, vars: &ExecutionVariables) -> Result<String, DeferredError> {
        let mut resolved = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => resolved.push_str(text),
                Segment::Variable(var) => {
                    let value = vars.get(&var.namespace, &var.name).ok_or_else(|| {
                        DeferredError::Unresolved {
                            namespace: var.namespace.clone(),
                            name: var.name.clone(),
                        }
                    })?;
                    resolved.push_str(value);
                }
            }
        }
        Ok(resolved)
    }

    fn normalize(&mut self) {
        let mut merged: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for segment in self.segments.drain(..) {
            match segment {
                Segment::Literal(text) if text.is_empty() => {}
                Segment::Literal(text) => {
                    if let Some(Segment::Literal(prev)) = merged.last_mut() {
                        prev.push_str(&text);
                    } else {
                        merged.push(Segment::Literal(text));
                    }
                }
                other => merged.push(other),
            }
        }
        self.segments = merged;
    }
}

impl Serialize for Deferred {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.placeholder())
    }
}

/// Variables produced by a running pipeline execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionVariables {
    values: HashMap<(String, String), String>,
}

impl ExecutionVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.set(namespace, name, value);
        self
    }

    pub fn set(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.values
            .insert((namespace.into(), name.into()), value.into());
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&str> {
        self.values
            .get(&(namespace.to_string(), name.to_string()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_placeholder() {
        let commit = Deferred::variable("AppCode", "CommitId");
        assert_eq!(commit.placeholder(), "#{AppCode.CommitId}");
        assert!(!commit.is_static());
    }

    #[test]
    fn test_prefixed_placeholder() {
        let tag = Deferred::variable("AppCode", "CommitId").prefixed("rails-");
        assert_eq!(tag.placeholder(), "rails-#{AppCode.CommitId}");
    }

    #[test]
    fn test_resolve() {
        let tag = Deferred::variable("AppCode", "CommitId").prefixed("rails-");
        let vars = ExecutionVariables::new().with("AppCode", "CommitId", "abc123");
        assert_eq!(tag.resolve(&vars).unwrap(), "rails-abc123");
    }

    #[test]
    fn test_resolve_missing_variable() {
        let tag = Deferred::variable("AppCode", "CommitId");
        let err = tag.resolve(&ExecutionVariables::new()).unwrap_err();
        assert_eq!(
            err,
            DeferredError::Unresolved {
                namespace: "AppCode".to_string(),
                name: "CommitId".to_string(),
            }
        );
    }

    #[test]
    fn test_literal_is_static() {
        let value = Deferred::literal("fixed");
        assert!(value.is_static());
        assert_eq!(value.resolve(&ExecutionVariables::new()).unwrap(), "fixed");
    }

    #[test]
    fn test_literals_merge() {
        let value = Deferred::literal("a").suffixed("b").prefixed("");
        assert_eq!(value.segments.len(), 1);
        assert_eq!(value.placeholder(), "ab");
    }

    #[test]
    fn test_prefix_and_suffix_around_variable() {
        let value = Deferred::variable("Src", "CommitId")
            .prefixed("x-")
            .suffixed("-y");
        assert_eq!(value.placeholder(), "x-#{Src.CommitId}-y");
        assert_eq!(value.variables().count(), 1);
    }

    #[test]
    fn test_serializes_as_placeholder() {
        let value = Deferred::variable("Src", "CommitMessage");
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"#{Src.CommitMessage}\"");
    }
}
