//! Namespace-scoped permission statements
//!
//! Every capability maps to the smallest statement that lets a deployment
//! manage its own resources: those whose names begin with the namespace.
//! Capabilities that cannot be scoped by name are not here; see
//! [`super::global`].

use super::statement::{Condition, PolicyStatement};
use super::AwsEnv;
use crate::namespace::Namespace;

/// A capability a deployment role can be granted over its own namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Buckets and objects.
    S3,
    /// Clusters, services and tasks.
    Ecs,
    /// Application load balancers, listeners and target groups.
    LoadBalancer,
    /// Security group rules, scoped through the group's `Name` tag.
    Network,
    /// Roles, optionally narrowed to a name suffix after the namespace.
    IamRole { suffix: Option<String> },
    /// Function execution and management.
    Lambda,
    /// Log groups, including the per-function `/aws/lambda/` groups.
    Logs,
    /// Event rules.
    Events,
    /// Record sets in one hosted zone, limited to names under the namespace.
    Route53RecordSet { zone_id: String },
    /// Parameters under `/all/<namespace>/` and `/<namespace>/`.
    Ssm,
    /// Tables, optionally narrowed to a name suffix after the namespace.
    DynamoDb { table: Option<String> },
    Sqs,
    Sns,
    StepFunctions,
    CloudFormation,
    Ecr,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::S3 => "s3",
            Capability::Ecs => "ecs",
            Capability::LoadBalancer => "load-balancer",
            Capability::Network => "network",
            Capability::IamRole { .. } => "iam-role",
            Capability::Lambda => "lambda",
            Capability::Logs => "logs",
            Capability::Events => "events",
            Capability::Route53RecordSet { .. } => "route53-record-set",
            Capability::Ssm => "ssm",
            Capability::DynamoDb { .. } => "dynamodb",
            Capability::Sqs => "sqs",
            Capability::Sns => "sns",
            Capability::StepFunctions => "step-functions",
            Capability::CloudFormation => "cloudformation",
            Capability::Ecr => "ecr",
        }
    }

    /// Parses a capability by its [`name`](Self::name). `argument` is the
    /// hosted zone id for record sets and the optional suffix for roles and
    /// tables; every other capability ignores it.
    pub fn from_name(name: &str, argument: Option<&str>) -> Option<Self> {
        let capability = match name.to_lowercase().as_str() {
            "s3" => Capability::S3,
            "ecs" => Capability::Ecs,
            "load-balancer" => Capability::LoadBalancer,
            "network" => Capability::Network,
            "iam-role" => Capability::IamRole {
                suffix: argument.map(str::to_string),
            },
            "lambda" => Capability::Lambda,
            "logs" => Capability::Logs,
            "events" => Capability::Events,
            "route53-record-set" => Capability::Route53RecordSet {
                zone_id: argument?.to_string(),
            },
            "ssm" => Capability::Ssm,
            "dynamodb" => Capability::DynamoDb {
                table: argument.map(str::to_string),
            },
            "sqs" => Capability::Sqs,
            "sns" => Capability::Sns,
            "step-functions" => Capability::StepFunctions,
            "cloudformation" => Capability::CloudFormation,
            "ecr" => Capability::Ecr,
            _ => return None,
        };
        Some(capability)
    }
}

/// How a statement's resources are tied back to the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The resource ARN is `prefix` followed by `pattern`.
    Named { prefix: String, pattern: String },
    /// The resource cannot be named, a condition pins it to `pattern`.
    Conditioned {
        resource: String,
        operator: String,
        key: String,
        pattern: String,
    },
}

impl Scope {
    fn named(prefix: impl Into<String>, pattern: impl Into<String>) -> Self {
        Scope::Named {
            prefix: prefix.into(),
            pattern: pattern.into(),
        }
    }

    /// The namespace-derived part of the scope.
    pub fn pattern(&self) -> &str {
        match self {
            Scope::Named { pattern, .. } | Scope::Conditioned { pattern, .. } => pattern,
        }
    }

    pub fn resource(&self) -> String {
        match self {
            Scope::Named { prefix, pattern } => format!("{}{}", prefix, pattern),
            Scope::Conditioned { resource, .. } => resource.clone(),
        }
    }
}

pub fn actions(capability: &Capability) -> &'static [&'static str] {
    match capability {
        Capability::S3 => &[
            "s3:CreateBucket",
            "s3:DeleteBucket",
            "s3:DeleteBucketPolicy",
            "s3:DeleteObject",
            "s3:GetBucketLocation",
            "s3:GetBucketPolicy",
            "s3:GetObject",
            "s3:ListBucket",
            "s3:PutBucketCORS",
            "s3:PutBucketPolicy",
            "s3:PutBucketPublicAccessBlock",
            "s3:PutBucketTagging",
            "s3:PutBucketVersioning",
            "s3:PutBucketWebsite",
            "s3:PutEncryptionConfiguration",
            "s3:PutLifecycleConfiguration",
            "s3:PutObject",
        ],
        Capability::Ecs => &[
            "ecs:CreateCluster",
            "ecs:CreateService",
            "ecs:DeleteCluster",
            "ecs:DeleteService",
            "ecs:DescribeClusters",
            "ecs:DescribeServices",
            "ecs:DescribeTasks",
            "ecs:RunTask",
            "ecs:StopTask",
            "ecs:TagResource",
            "ecs:UpdateService",
        ],
        Capability::LoadBalancer => &[
            "elasticloadbalancing:AddTags",
            "elasticloadbalancing:CreateListener",
            "elasticloadbalancing:CreateLoadBalancer",
            "elasticloadbalancing:CreateRule",
            "elasticloadbalancing:CreateTargetGroup",
            "elasticloadbalancing:DeleteListener",
            "elasticloadbalancing:DeleteLoadBalancer",
            "elasticloadbalancing:DeleteRule",
            "elasticloadbalancing:DeleteTargetGroup",
            "elasticloadbalancing:ModifyListener",
            "elasticloadbalancing:ModifyLoadBalancerAttributes",
            "elasticloadbalancing:ModifyRule",
            "elasticloadbalancing:ModifyTargetGroup",
            "elasticloadbalancing:ModifyTargetGroupAttributes",
            "elasticloadbalancing:RemoveTags",
        ],
        Capability::Network => &[
            "ec2:AuthorizeSecurityGroupEgress",
            "ec2:AuthorizeSecurityGroupIngress",
            "ec2:DeleteSecurityGroup",
            "ec2:RevokeSecurityGroupEgress",
            "ec2:RevokeSecurityGroupIngress",
            "ec2:UpdateSecurityGroupRuleDescriptionsEgress",
            "ec2:UpdateSecurityGroupRuleDescriptionsIngress",
        ],
        Capability::IamRole { .. } => &[
            "iam:AttachRolePolicy",
            "iam:CreateRole",
            "iam:DeleteRole",
            "iam:DeleteRolePolicy",
            "iam:DetachRolePolicy",
            "iam:GetRole",
            "iam:GetRolePolicy",
            "iam:PassRole",
            "iam:PutRolePolicy",
            "iam:TagRole",
            "iam:UntagRole",
            "iam:UpdateAssumeRolePolicy",
        ],
        Capability::Lambda => &[
            "lambda:AddPermission",
            "lambda:CreateFunction",
            "lambda:DeleteFunction",
            "lambda:GetFunction",
            "lambda:GetFunctionConfiguration",
            "lambda:InvokeFunction",
            "lambda:ListTags",
            "lambda:RemovePermission",
            "lambda:TagResource",
            "lambda:UpdateFunctionCode",
            "lambda:UpdateFunctionConfiguration",
        ],
        Capability::Logs => &[
            "logs:CreateLogGroup",
            "logs:DeleteLogGroup",
            "logs:PutRetentionPolicy",
            "logs:DeleteRetentionPolicy",
            "logs:TagLogGroup",
        ],
        Capability::Events => &[
            "events:DeleteRule",
            "events:DescribeRule",
            "events:PutRule",
            "events:PutTargets",
            "events:RemoveTargets",
        ],
        Capability::Route53RecordSet { .. } => &[
            "route53:ChangeResourceRecordSets",
            "route53:ListResourceRecordSets",
        ],
        Capability::Ssm => &[
            "ssm:AddTagsToResource",
            "ssm:DeleteParameter",
            "ssm:GetParameter",
            "ssm:GetParameters",
            "ssm:GetParametersByPath",
            "ssm:PutParameter",
        ],
        Capability::DynamoDb { .. } => &[
            "dynamodb:CreateTable",
            "dynamodb:DeleteTable",
            "dynamodb:DescribeContinuousBackups",
            "dynamodb:DescribeTable",
            "dynamodb:DescribeTimeToLive",
            "dynamodb:TagResource",
            "dynamodb:UpdateContinuousBackups",
            "dynamodb:UpdateTable",
            "dynamodb:UpdateTimeToLive",
        ],
        Capability::Sqs => &[
            "sqs:CreateQueue",
            "sqs:DeleteQueue",
            "sqs:GetQueueAttributes",
            "sqs:SetQueueAttributes",
            "sqs:TagQueue",
        ],
        Capability::Sns => &[
            "sns:CreateTopic",
            "sns:DeleteTopic",
            "sns:GetTopicAttributes",
            "sns:SetTopicAttributes",
            "sns:Subscribe",
            "sns:Unsubscribe",
        ],
        Capability::StepFunctions => &[
            "states:CreateStateMachine",
            "states:DeleteStateMachine",
            "states:DescribeStateMachine",
            "states:TagResource",
            "states:UpdateStateMachine",
        ],
        Capability::CloudFormation => &[
            "cloudformation:CreateChangeSet",
            "cloudformation:DeleteChangeSet",
            "cloudformation:DescribeChangeSet",
            "cloudformation:DescribeStackEvents",
            "cloudformation:DescribeStacks",
            "cloudformation:ExecuteChangeSet",
            "cloudformation:GetTemplate",
        ],
        Capability::Ecr => &[
            "ecr:BatchCheckLayerAvailability",
            "ecr:BatchGetImage",
            "ecr:CompleteLayerUpload",
            "ecr:CreateRepository",
            "ecr:DeleteRepository",
            "ecr:DescribeImages",
            "ecr:GetDownloadUrlForLayer",
            "ecr:InitiateLayerUpload",
            "ecr:PutImage",
            "ecr:PutLifecyclePolicy",
            "ecr:SetRepositoryPolicy",
            "ecr:UploadLayerPart",
        ],
    }
}

/// Scopes the capability's resources to `namespace`.
pub fn scopes(namespace: &Namespace, capability: &Capability, env: &AwsEnv) -> Vec<Scope> {
    let ns = namespace.as_str();
    let pattern = namespace.pattern();
    let truncated = format!("{}*", namespace.truncated());
    let (region, account) = (env.region.as_str(), env.account.as_str());

    match capability {
        Capability::S3 => vec![
            Scope::named("arn:aws:s3:::", pattern.clone()),
            Scope::named("arn:aws:s3:::", format!("{}/*", pattern)),
        ],
        Capability::Ecs => {
            let base = format!("arn:aws:ecs:{}:{}:", region, account);
            vec![
                Scope::named(format!("{}cluster/", base), pattern.clone()),
                Scope::named(format!("{}service/", base), pattern.clone()),
                Scope::named(format!("{}task/", base), pattern.clone()),
                Scope::named(format!("{}task-definition/", base), format!("{}:*", pattern)),
            ]
        }
        Capability::LoadBalancer => {
            let base = format!("arn:aws:elasticloadbalancing:{}:{}:", region, account);
            vec![
                Scope::named(format!("{}loadbalancer/app/", base), truncated.clone()),
                Scope::named(format!("{}listener/app/", base), truncated.clone()),
                Scope::named(format!("{}listener-rule/app/", base), truncated.clone()),
                Scope::named(format!("{}targetgroup/", base), truncated),
            ]
        }
        Capability::Network => vec![Scope::Conditioned {
            resource: format!("arn:aws:ec2:{}:{}:security-group/*", region, account),
            operator: "StringLike".to_string(),
            key: "ec2:ResourceTag/Name".to_string(),
            pattern,
        }],
        Capability::IamRole { suffix } => vec![Scope::named(
            format!("arn:aws:iam::{}:role/", account),
            format!("{}{}*", ns, suffix.as_deref().unwrap_or("")),
        )],
        Capability::Lambda => vec![Scope::named(
            format!("arn:aws:lambda:{}:{}:function:", region, account),
            pattern,
        )],
        Capability::Logs => {
            let base = format!("arn:aws:logs:{}:{}:log-group:", region, account);
            vec![
                Scope::named(base.clone(), pattern.clone()),
                Scope::named(format!("{}/aws/lambda/", base), pattern),
            ]
        }
        Capability::Events => vec![Scope::named(
            format!("arn:aws:events:{}:{}:rule/", region, account),
            pattern,
        )],
        Capability::Route53RecordSet { zone_id } => vec![Scope::Conditioned {
            resource: format!("arn:aws:route53:::hostedzone/{}", zone_id),
            operator: "ForAllValues:StringLike".to_string(),
            key: "route53:ChangeResourceRecordSetsNormalizedRecordNames".to_string(),
            pattern,
        }],
        Capability::Ssm => {
            let base = format!("arn:aws:ssm:{}:{}:parameter/", region, account);
            vec![
                Scope::named(format!("{}all/", base), format!("{}/*", ns)),
                Scope::named(base, format!("{}/*", ns)),
            ]
        }
        Capability::DynamoDb { table } => {
            let name = format!("{}{}*", ns, table.as_deref().unwrap_or(""));
            let base = format!("arn:aws:dynamodb:{}:{}:table/", region, account);
            vec![
                Scope::named(base.clone(), name.clone()),
                Scope::named(base, format!("{}/*", name)),
            ]
        }
        Capability::Sqs => vec![Scope::named(
            format!("arn:aws:sqs:{}:{}:", region, account),
            pattern,
        )],
        Capability::Sns => vec![Scope::named(
            format!("arn:aws:sns:{}:{}:", region, account),
            pattern,
        )],
        Capability::StepFunctions => vec![Scope::named(
            format!("arn:aws:states:{}:{}:stateMachine:", region, account),
            pattern,
        )],
        Capability::CloudFormation => vec![Scope::named(
            format!("arn:aws:cloudformation:{}:{}:stack/", region, account),
            format!("{}/*", pattern),
        )],
        Capability::Ecr => vec![Scope::named(
            format!("arn:aws:ecr:{}:{}:repository/", region, account),
            pattern,
        )],
    }
}

/// The statement granting `capability` over resources owned by `namespace`.
pub fn statement(namespace: &Namespace, capability: &Capability, env: &AwsEnv) -> PolicyStatement {
    let scopes = scopes(namespace, capability, env);
    let resources: Vec<String> = scopes.iter().map(Scope::resource).collect();
    let mut statement = PolicyStatement::allow(actions(capability).iter().copied(), resources);

    for scope in &scopes {
        if let Scope::Conditioned {
            operator,
            key,
            pattern,
            ..
        } = scope
        {
            statement = statement.with_condition(Condition::new(
                operator.clone(),
                key.clone(),
                vec![pattern.clone()],
            ));
        }
    }

    statement
}

/// One statement per capability, in the order given.
pub fn statements(
    namespace: &Namespace,
    capabilities: &[Capability],
    env: &AwsEnv,
) -> Vec<PolicyStatement> {
    capabilities
        .iter()
        .map(|capability| statement(namespace, capability, env))
        .collect()
}
