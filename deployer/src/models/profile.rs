//! Cloud credentials profile

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

/// Credentials a user deploys with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsProfile {
    pub user_id: String,
    pub aws_id: String,
    #[serde(serialize_with = "serialize_secret")]
    pub aws_secret: SecretString,
}

impl AwsProfile {
    pub fn new(user_id: impl Into<String>, aws_id: impl Into<String>, aws_secret: &str) -> Self {
        Self {
            user_id: user_id.into(),
            aws_id: aws_id.into(),
            aws_secret: SecretString::from(aws_secret),
        }
    }
}

// The persistent store needs the secret in clear; API responses use
// `ProfileSummary` instead.
fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

/// A profile with the secret stripped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub user_id: String,
    pub aws_id: String,
}

impl From<&AwsProfile> for ProfileSummary {
    fn from(profile: &AwsProfile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            aws_id: profile.aws_id.clone(),
        }
    }
}
