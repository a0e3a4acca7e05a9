//! Firewall rules, boot script and identity documents for container hosts

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ipnet::Ipv4Net;

use crate::cloud::types::{IngressRule, Protocol, Tag};

/// Ports every container host needs: ssh, http and the overlay network
pub const REQUIRED_PORTS: [(u16, Protocol); 5] = [
    (22, Protocol::Tcp),
    (80, Protocol::Tcp),
    (6783, Protocol::Tcp),
    (6783, Protocol::Udp),
    (6784, Protocol::Udp),
];

/// Lets compute instances assume the node role
pub const TRUST_DOCUMENT: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Principal": { "Service": "ec2.amazonaws.com" },
      "Action": "sts:AssumeRole"
    }
  ]
}"#;

/// Permissions a container host needs to join its cluster and ship logs
pub const DEFAULT_ROLE_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Action": [
        "ecs:CreateCluster",
        "ecs:DeregisterContainerInstance",
        "ecs:DiscoverPollEndpoint",
        "ecs:Poll",
        "ecs:RegisterContainerInstance",
        "ecs:StartTelemetrySession",
        "ecs:Submit*",
        "ecr:GetAuthorizationToken",
        "ecr:BatchCheckLayerAvailability",
        "ecr:GetDownloadUrlForLayer",
        "ecr:BatchGetImage",
        "ec2:DescribeInstances",
        "ec2:DescribeTags",
        "logs:CreateLogStream",
        "logs:PutLogEvents"
      ],
      "Resource": "*"
    }
  ]
}"#;

fn anywhere() -> Ipv4Net {
    Ipv4Net::default()
}

/// Required ports plus the user's TCP ports, deduplicated, all open to the world
pub fn ingress_rules(allowed_ports: &[u16]) -> BTreeSet<IngressRule> {
    let required = REQUIRED_PORTS.iter().copied();
    let allowed = allowed_ports.iter().map(|port| (*port, Protocol::Tcp));

    required
        .chain(allowed)
        .map(|(port, protocol)| IngressRule {
            port,
            protocol,
            cidr: anywhere(),
        })
        .collect()
}

/// Base64 boot script joining the host to `cluster` and starting the overlay
pub fn user_data(cluster: &str) -> String {
    let script = format!(
        "#!/bin/bash\n\
         echo ECS_CLUSTER={} >> /etc/ecs/ecs.config\n\
         echo manual > /etc/weave/scope.override\n\
         weave launch",
        cluster
    );
    BASE64.encode(script)
}

/// Tags identifying an instance as part of `deployment`
pub fn instance_tags(deployment: &str) -> Vec<Tag> {
    vec![
        Tag::new("Deployment", deployment),
        Tag::new("weave:peerGroupName", deployment),
    ]
}
