//! Messages attached to stacks during composition
//!
//! Problems that should stop a stack from deploying, but should not stop the
//! rest of the pipeline from being composed for inspection, are recorded as
//! error annotations instead of being returned as errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub level: AnnotationLevel,
    /// Stack or step the message is attached to.
    pub target: String,
    pub message: String,
}

impl Annotation {
    pub fn error(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: AnnotationLevel::Error,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn warning(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: AnnotationLevel::Warning,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn info(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: AnnotationLevel::Info,
            target: target.into(),
            message: message.into(),
        }
    }

    /// Error annotations block deployment of their target.
    pub fn is_blocking(&self) -> bool {
        self.level == AnnotationLevel::Error
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            AnnotationLevel::Info => "info",
            AnnotationLevel::Warning => "warning",
            AnnotationLevel::Error => "error",
        };
        write!(f, "[{}] {}: {}", level, self.target, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Annotations {
    entries: Vec<Annotation>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, annotation: Annotation) {
        if annotation.level >= AnnotationLevel::Warning {
            warn!(target = %annotation.target, "{}", annotation.message);
        }
        self.entries.push(annotation);
    }

    pub fn extend<I: IntoIterator<Item = Annotation>>(&mut self, annotations: I) {
        for annotation in annotations {
            self.add(annotation);
        }
    }

    pub fn has_blocking(&self) -> bool {
        self.entries.iter().any(Annotation::is_blocking)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<Annotation> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_errors_block() {
        assert!(Annotation::error("app-test", "missing").is_blocking());
        assert!(!Annotation::warning("app-test", "odd").is_blocking());
        assert!(!Annotation::info("app-test", "fyi").is_blocking());
    }

    #[test]
    fn test_collection() {
        let mut annotations = Annotations::new();
        assert!(annotations.is_empty());

        annotations.add(Annotation::warning("a", "w"));
        assert!(!annotations.has_blocking());

        annotations.extend(vec![Annotation::error("b", "e")]);
        assert!(annotations.has_blocking());
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations.into_vec()[1].target, "b");
    }

    #[test]
    fn test_display() {
        let annotation = Annotation::error("app-test-service", "Dockerfile not found");
        assert_eq!(
            annotation.to_string(),
            "[error] app-test-service: Dockerfile not found"
        );
    }
}
