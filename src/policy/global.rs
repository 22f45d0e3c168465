//! Actions that cannot be scoped to named resources
//!
//! The provider APIs behind these actions accept no resource narrower than
//! `*`. They are grouped here so every wildcard grant is explicit and
//! reviewable instead of hiding inside a namespaced capability.

use super::statement::PolicyStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalAction {
    /// CloudFront distributions and origin access identities.
    Cloudfront,
    /// Registry login token.
    EcrAuth,
    /// Application autoscaling targets and policies.
    AutoScaling,
    /// Metric alarms.
    Alarms,
    /// Security group creation and network lookups.
    Ec2,
    /// Network interfaces for steps placed in a VPC.
    VpcNetworkInterfaces,
    /// Task definition registration.
    Ecs,
    /// Hosted zone lookups and change polling.
    Route53,
    /// Bucket listing.
    S3,
    /// Random password generation.
    Secrets,
    /// Search domain lookups.
    Es,
    /// Log group description, used by the deploy tool's error reporting.
    Logs,
}

impl GlobalAction {
    pub fn all() -> &'static [GlobalAction] {
        &[
            GlobalAction::Cloudfront,
            GlobalAction::EcrAuth,
            GlobalAction::AutoScaling,
            GlobalAction::Alarms,
            GlobalAction::Ec2,
            GlobalAction::VpcNetworkInterfaces,
            GlobalAction::Ecs,
            GlobalAction::Route53,
            GlobalAction::S3,
            GlobalAction::Secrets,
            GlobalAction::Es,
            GlobalAction::Logs,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            GlobalAction::Cloudfront => "cloudfront",
            GlobalAction::EcrAuth => "ecr-auth",
            GlobalAction::AutoScaling => "autoscaling",
            GlobalAction::Alarms => "alarms",
            GlobalAction::Ec2 => "ec2",
            GlobalAction::VpcNetworkInterfaces => "vpc-network-interfaces",
            GlobalAction::Ecs => "ecs",
            GlobalAction::Route53 => "route53",
            GlobalAction::S3 => "s3",
            GlobalAction::Secrets => "secrets",
            GlobalAction::Es => "es",
            GlobalAction::Logs => "logs",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        Self::all().iter().copied().find(|action| action.name() == name)
    }

    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            GlobalAction::Cloudfront => &[
                "cloudfront:CreateCloudFrontOriginAccessIdentity",
                "cloudfront:CreateDistribution",
                "cloudfront:CreateInvalidation",
                "cloudfront:DeleteCloudFrontOriginAccessIdentity",
                "cloudfront:DeleteDistribution",
                "cloudfront:GetCloudFrontOriginAccessIdentity",
                "cloudfront:GetDistribution",
                "cloudfront:TagResource",
                "cloudfront:UpdateDistribution",
            ],
            GlobalAction::EcrAuth => &["ecr:GetAuthorizationToken"],
            GlobalAction::AutoScaling => &[
                "application-autoscaling:DeleteScalingPolicy",
                "application-autoscaling:DeregisterScalableTarget",
                "application-autoscaling:DescribeScalableTargets",
                "application-autoscaling:DescribeScalingActivities",
                "application-autoscaling:DescribeScalingPolicies",
                "application-autoscaling:PutScalingPolicy",
                "application-autoscaling:RegisterScalableTarget",
            ],
            GlobalAction::Alarms => &[
                "cloudwatch:DeleteAlarms",
                "cloudwatch:DescribeAlarms",
                "cloudwatch:PutMetricAlarm",
            ],
            GlobalAction::Ec2 => &[
                "ec2:CreateSecurityGroup",
                "ec2:CreateTags",
                "ec2:DescribeAvailabilityZones",
                "ec2:DescribeSecurityGroups",
                "ec2:DescribeSubnets",
                "ec2:DescribeVpcs",
            ],
            GlobalAction::VpcNetworkInterfaces => &[
                "ec2:CreateNetworkInterface",
                "ec2:CreateNetworkInterfacePermission",
                "ec2:DeleteNetworkInterface",
                "ec2:DescribeDhcpOptions",
                "ec2:DescribeNetworkInterfaces",
                "ec2:DescribeSecurityGroups",
                "ec2:DescribeSubnets",
                "ec2:DescribeVpcs",
            ],
            GlobalAction::Ecs => &[
                "ecs:DeregisterTaskDefinition",
                "ecs:DescribeTaskDefinition",
                "ecs:RegisterTaskDefinition",
            ],
            GlobalAction::Route53 => &[
                "route53:GetChange",
                "route53:GetHostedZone",
                "route53:ListHostedZones",
                "route53:ListHostedZonesByName",
            ],
            GlobalAction::S3 => &["s3:ListAllMyBuckets"],
            GlobalAction::Secrets => &["secretsmanager:GetRandomPassword"],
            GlobalAction::Es => &[
                "es:DescribeElasticsearchDomains",
                "es:ListDomainNames",
            ],
            GlobalAction::Logs => &["logs:DescribeLogGroups"],
        }
    }
}

/// One wildcard statement covering every action of `actions`.
pub fn statement(actions: &[GlobalAction]) -> PolicyStatement {
    let all_actions = actions
        .iter()
        .flat_map(|action| action.actions().iter().copied());
    PolicyStatement::global(all_actions).normalized()
}
