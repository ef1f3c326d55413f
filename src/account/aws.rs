//! account::aws
//!
//! AWS IAM implementation of [`AccountApi`].
//!
//! # Mapping
//!
//! | Concept          | IAM resource                    |
//! |------------------|---------------------------------|
//! | principal        | IAM user                        |
//! | credential pair  | IAM access key                  |
//! | policy document  | customer-managed policy         |
//!
//! # Error classification
//!
//! SDK errors are classified here and nowhere else:
//!
//! - timeouts and dispatch failures are `Transient`
//! - service errors are mapped by their IAM error code ([`classify_code`])
//! - anything the adapter cannot interpret is `Malformed`
//!
//! # Retries
//!
//! The SDK's own retry layer is disabled. Retries are decided by the engine,
//! which must not repeat a non-idempotent call such as `CreateAccessKey`.

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iam::primitives::DateTime as AwsDateTime;
use aws_sdk_iam::types::{PolicyScopeType, StatusType};
use aws_sdk_iam::Client;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;

use super::traits::{AccessKeyInfo, AccountApi, PolicyVersionInfo, RemotePolicy, RemoteUser};
use crate::core::error::{ApiError, ErrorKind};
use crate::core::policy::PolicyDocument;
use crate::core::secret::{CredentialPair, SecretValue};
use crate::core::types::{PolicyName, PrincipalName};

/// Description attached to policies this tool creates.
const POLICY_DESCRIPTION: &str = "Managed by keyrelay";

/// IAM account adapter.
#[derive(Debug, Clone)]
pub struct AwsAccount {
    client: Client,
}

impl AwsAccount {
    /// Build a client from the default credential chain.
    ///
    /// `region` overrides the chain's region when set.
    pub async fn from_env(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::disabled());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;

        tracing::debug!(
            region = ?sdk_config.region().map(|r| r.to_string()),
            "AWS IAM adapter initialized"
        );

        Self::from_client(Client::new(&sdk_config))
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Map an IAM error code to the taxonomy.
pub fn classify_code(code: Option<&str>) -> ErrorKind {
    match code {
        Some("NoSuchEntity") => ErrorKind::NotFound,
        Some("EntityAlreadyExists") | Some("DeleteConflict") => ErrorKind::Conflict,
        Some("LimitExceeded") => ErrorKind::QuotaExceeded,
        Some("AccessDenied")
        | Some("AccessDeniedException")
        | Some("UnauthorizedOperation")
        | Some("InvalidClientTokenId")
        | Some("SignatureDoesNotMatch")
        | Some("ExpiredToken")
        | Some("UnrecognizedClient") => ErrorKind::PermissionDenied,
        Some("Throttling")
        | Some("ThrottlingException")
        | Some("RequestLimitExceeded")
        | Some("ConcurrentModification")
        | Some("ServiceFailure")
        | Some("ServiceUnavailable")
        | Some("InternalFailure") => ErrorKind::Transient,
        _ => ErrorKind::Malformed,
    }
}

fn classify<E>(operation: &str, err: SdkError<E>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ErrorKind::Transient
        }
        SdkError::ServiceError(context) => classify_code(context.err().code()),
        _ => ErrorKind::Malformed,
    };
    ApiError::new(kind, format!("{}: {}", operation, DisplayErrorContext(&err)))
}

fn missing(operation: &str, field: &str) -> ApiError {
    ApiError::Malformed(format!("{}: response has no {}", operation, field))
}

fn to_chrono(value: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

/// Policy documents come back URL-encoded.
fn decode_document(encoded: &str) -> Result<String, ApiError> {
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ApiError::Malformed(format!("policy document is not UTF-8: {}", e)))
}

#[async_trait]
impl AccountApi for AwsAccount {
    fn name(&self) -> &'static str {
        "aws-iam"
    }

    async fn get_user(&self, name: &PrincipalName) -> Result<Option<RemoteUser>, ApiError> {
        tracing::debug!(user = %name, "GetUser");
        let output = match self.client.get_user().user_name(name.as_str()).send().await {
            Ok(output) => output,
            Err(e) => {
                let err = classify("GetUser", e);
                if err.kind() == ErrorKind::NotFound {
                    return Ok(None);
                }
                return Err(err);
            }
        };

        let user = output.user().ok_or_else(|| missing("GetUser", "user"))?;
        Ok(Some(RemoteUser {
            name: name.clone(),
            arn: user.arn().to_string(),
            created_at: to_chrono(user.create_date()),
        }))
    }

    async fn create_user(
        &self,
        name: &PrincipalName,
        path: &str,
    ) -> Result<RemoteUser, ApiError> {
        tracing::debug!(user = %name, path, "CreateUser");
        let output = self
            .client
            .create_user()
            .user_name(name.as_str())
            .path(path)
            .send()
            .await
            .map_err(|e| classify("CreateUser", e))?;

        let user = output.user().ok_or_else(|| missing("CreateUser", "user"))?;
        Ok(RemoteUser {
            name: name.clone(),
            arn: user.arn().to_string(),
            created_at: to_chrono(user.create_date()),
        })
    }

    async fn list_access_keys(
        &self,
        user: &PrincipalName,
    ) -> Result<Vec<AccessKeyInfo>, ApiError> {
        tracing::debug!(user = %user, "ListAccessKeys");
        let output = self
            .client
            .list_access_keys()
            .user_name(user.as_str())
            .send()
            .await
            .map_err(|e| classify("ListAccessKeys", e))?;

        output
            .access_key_metadata()
            .iter()
            .map(|key| {
                Ok(AccessKeyInfo {
                    access_id: key
                        .access_key_id()
                        .ok_or_else(|| missing("ListAccessKeys", "access key id"))?
                        .to_string(),
                    active: key.status() == Some(&StatusType::Active),
                    created_at: key.create_date().and_then(to_chrono),
                })
            })
            .collect()
    }

    async fn create_access_key(&self, user: &PrincipalName) -> Result<CredentialPair, ApiError> {
        tracing::debug!(user = %user, "CreateAccessKey");
        let output = self
            .client
            .create_access_key()
            .user_name(user.as_str())
            .send()
            .await
            .map_err(|e| classify("CreateAccessKey", e))?;

        let key = output
            .access_key()
            .ok_or_else(|| missing("CreateAccessKey", "access key"))?;
        Ok(CredentialPair {
            access_id: key.access_key_id().to_string(),
            access_secret: SecretValue::new(key.secret_access_key()),
            principal: user.clone(),
            created_at: key
                .create_date()
                .and_then(to_chrono)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn find_policy(&self, name: &PolicyName) -> Result<Option<RemotePolicy>, ApiError> {
        tracing::debug!(policy = %name, "ListPolicies");
        let mut marker: Option<String> = None;
        let found = loop {
            let output = self
                .client
                .list_policies()
                .scope(PolicyScopeType::Local)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify("ListPolicies", e))?;

            if let Some(policy) = output
                .policies()
                .iter()
                .find(|p| p.policy_name() == Some(name.as_str()))
            {
                break Some(policy.clone());
            }

            match output.marker() {
                Some(next) if output.is_truncated() => marker = Some(next.to_string()),
                _ => break None,
            }
        };

        let Some(policy) = found else {
            return Ok(None);
        };
        let arn = policy
            .arn()
            .ok_or_else(|| missing("ListPolicies", "policy arn"))?
            .to_string();
        let default_version = policy
            .default_version_id()
            .ok_or_else(|| missing("ListPolicies", "default version id"))?
            .to_string();

        tracing::debug!(policy = %name, version = %default_version, "GetPolicyVersion");
        let output = self
            .client
            .get_policy_version()
            .policy_arn(&arn)
            .version_id(&default_version)
            .send()
            .await
            .map_err(|e| classify("GetPolicyVersion", e))?;
        let encoded = output
            .policy_version()
            .and_then(|v| v.document())
            .ok_or_else(|| missing("GetPolicyVersion", "document"))?;
        let document = PolicyDocument::from_json(name.clone(), &decode_document(encoded)?)
            .map_err(|e| ApiError::Malformed(e.to_string()))?;

        Ok(Some(RemotePolicy {
            name: name.clone(),
            arn,
            default_version,
            document,
        }))
    }

    async fn create_policy(&self, document: &PolicyDocument) -> Result<RemotePolicy, ApiError> {
        tracing::debug!(policy = %document.name(), "CreatePolicy");
        let json = document
            .to_json()
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        let output = self
            .client
            .create_policy()
            .policy_name(document.name().as_str())
            .policy_document(json)
            .description(POLICY_DESCRIPTION)
            .send()
            .await
            .map_err(|e| classify("CreatePolicy", e))?;

        let policy = output
            .policy()
            .ok_or_else(|| missing("CreatePolicy", "policy"))?;
        Ok(RemotePolicy {
            name: document.name().clone(),
            arn: policy
                .arn()
                .ok_or_else(|| missing("CreatePolicy", "policy arn"))?
                .to_string(),
            default_version: policy.default_version_id().unwrap_or("v1").to_string(),
            document: document.clone(),
        })
    }

    async fn list_policy_versions(&self, arn: &str) -> Result<Vec<PolicyVersionInfo>, ApiError> {
        tracing::debug!(policy_arn = arn, "ListPolicyVersions");
        let output = self
            .client
            .list_policy_versions()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| classify("ListPolicyVersions", e))?;

        output
            .versions()
            .iter()
            .map(|v| {
                Ok(PolicyVersionInfo {
                    version_id: v
                        .version_id()
                        .ok_or_else(|| missing("ListPolicyVersions", "version id"))?
                        .to_string(),
                    is_default: v.is_default_version(),
                    created_at: v.create_date().and_then(to_chrono),
                })
            })
            .collect()
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<(), ApiError> {
        tracing::debug!(policy_arn = arn, version_id, "DeletePolicyVersion");
        self.client
            .delete_policy_version()
            .policy_arn(arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| classify("DeletePolicyVersion", e))?;
        Ok(())
    }

    async fn create_policy_version(
        &self,
        arn: &str,
        document: &PolicyDocument,
    ) -> Result<String, ApiError> {
        tracing::debug!(policy_arn = arn, "CreatePolicyVersion");
        let json = document
            .to_json()
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        let output = self
            .client
            .create_policy_version()
            .policy_arn(arn)
            .policy_document(json)
            .set_as_default(true)
            .send()
            .await
            .map_err(|e| classify("CreatePolicyVersion", e))?;

        output
            .policy_version()
            .and_then(|v| v.version_id())
            .map(str::to_string)
            .ok_or_else(|| missing("CreatePolicyVersion", "version id"))
    }

    async fn list_attached_policies(&self, user: &PrincipalName) -> Result<Vec<String>, ApiError> {
        tracing::debug!(user = %user, "ListAttachedUserPolicies");
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = self
                .client
                .list_attached_user_policies()
                .user_name(user.as_str())
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify("ListAttachedUserPolicies", e))?;

            arns.extend(
                output
                    .attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn().map(str::to_string)),
            );

            match output.marker() {
                Some(next) if output.is_truncated() => marker = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(arns)
    }

    async fn attach_policy(&self, user: &PrincipalName, arn: &str) -> Result<(), ApiError> {
        tracing::debug!(user = %user, policy_arn = arn, "AttachUserPolicy");
        self.client
            .attach_user_policy()
            .user_name(user.as_str())
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| classify("AttachUserPolicy", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_taxonomy() {
        assert_eq!(classify_code(Some("NoSuchEntity")), ErrorKind::NotFound);
        assert_eq!(classify_code(Some("EntityAlreadyExists")), ErrorKind::Conflict);
        assert_eq!(classify_code(Some("LimitExceeded")), ErrorKind::QuotaExceeded);
        assert_eq!(classify_code(Some("AccessDenied")), ErrorKind::PermissionDenied);
        assert_eq!(classify_code(Some("InvalidClientTokenId")), ErrorKind::PermissionDenied);
        assert_eq!(classify_code(Some("Throttling")), ErrorKind::Transient);
        assert_eq!(classify_code(Some("ServiceFailure")), ErrorKind::Transient);
    }

    #[test]
    fn unknown_or_missing_code_is_malformed() {
        assert_eq!(classify_code(Some("SomethingNew")), ErrorKind::Malformed);
        assert_eq!(classify_code(None), ErrorKind::Malformed);
    }

    #[test]
    fn document_is_url_decoded() {
        let encoded = "%7B%22Version%22%3A%222012-10-17%22%2C%22Statement%22%3A%5B%5D%7D";
        assert_eq!(
            decode_document(encoded).unwrap(),
            r#"{"Version":"2012-10-17","Statement":[]}"#
        );
    }

    #[test]
    fn invalid_utf8_document_is_malformed() {
        assert!(matches!(
            decode_document("%FF%FE"),
            Err(ApiError::Malformed(_))
        ));
    }

    #[test]
    fn aws_timestamps_convert() {
        let aws = AwsDateTime::from_secs(1_700_000_000);
        let converted = to_chrono(&aws).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }
}
