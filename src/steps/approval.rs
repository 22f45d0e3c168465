//! Manual approval gate
//!
//! Suspends the stage until someone approves or rejects it. The request is
//! published to a notification topic that a chat integration subscribes to.

use super::StepBuilder;
use crate::output::schema::{ActionConfiguration, ActionDefinition, ActionKind, ApprovalConfiguration};
use crate::policy::PolicyStatement;

pub const DEFAULT_APPROVAL_MESSAGE: &str = "Approve so this pipeline can deploy to production";

#[derive(Debug, Clone)]
pub struct ManualApprovalProps {
    pub action_name: String,
    pub notification_topic_arn: String,
    /// Host reviewers are pointed at, usually the stage that was just tested.
    pub review_hostname: Option<String>,
    pub message: String,
}

impl ManualApprovalProps {
    pub fn new(notification_topic_arn: impl Into<String>) -> Self {
        Self {
            action_name: "Approval".to_string(),
            notification_topic_arn: notification_topic_arn.into(),
            review_hostname: None,
            message: DEFAULT_APPROVAL_MESSAGE.to_string(),
        }
    }

    pub fn with_review_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.review_hostname = Some(hostname.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct ManualApproval {
    props: ManualApprovalProps,
}

impl ManualApproval {
    pub fn new(props: ManualApprovalProps) -> Self {
        Self { props }
    }

    pub fn policy(&self) -> Vec<PolicyStatement> {
        vec![PolicyStatement::allow(
            ["sns:Publish"],
            [self.props.notification_topic_arn.clone()],
        )]
    }
}

impl StepBuilder for ManualApproval {
    fn name(&self) -> &str {
        &self.props.action_name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Approval
    }

    fn to_action(&self, run_order: u32) -> ActionDefinition {
        ActionDefinition {
            name: self.props.action_name.clone(),
            kind: ActionKind::Approval,
            run_order,
            input_artifacts: vec![],
            output_artifacts: vec![],
            variables_namespace: None,
            configuration: ActionConfiguration::Manual(ApprovalConfiguration {
                notification_arn: self.props.notification_topic_arn.clone(),
                custom_data: Some(self.props.message.clone()),
                external_entity_link: self
                    .props
                    .review_hostname
                    .as_ref()
                    .map(|host| format!("https://{}", host)),
            }),
            policy: self.policy(),
        }
    }
}
