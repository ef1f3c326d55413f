//! core::policy
//!
//! Policy documents: (effect, action, resource) statements scoping what a
//! principal may do.
//!
//! # Comparison
//!
//! Statement order carries no meaning (the effective permission set is the
//! union of allows minus denies), so two documents are compared through a
//! normalized form: actions and resources sorted and deduplicated, `Sid`
//! ignored, statements sorted. [`PolicyDocument::fingerprint`] hashes that
//! form with SHA-256.
//!
//! Members this module does not model (`Condition`, `NotAction`,
//! `NotResource`, `Principal`, ...) are kept verbatim in
//! [`Statement::extra`] and take part in comparison, so a remote document
//! that differs only there is still seen as different.
//!
//! # Least privilege
//!
//! [`PolicyDocument::for_bucket`] grants object-storage actions on exactly
//! one bucket, plus (optionally) read-only introspection of the principal's
//! own user and policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::types::{BucketName, PolicyName, PrincipalName};

/// IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Object-storage actions granted on the bucket itself.
pub const BUCKET_ACTIONS: [&str; 2] = ["s3:GetBucketLocation", "s3:ListBucket"];

/// Object-storage actions granted on objects in the bucket.
pub const OBJECT_ACTIONS: [&str; 3] = ["s3:DeleteObject", "s3:GetObject", "s3:PutObject"];

/// Read-only calls on the principal's own user record.
pub const USER_INTROSPECTION_ACTIONS: [&str; 3] = [
    "iam:GetUser",
    "iam:ListAccessKeys",
    "iam:ListAttachedUserPolicies",
];

/// Read-only calls on the principal's own policy.
pub const POLICY_INTROSPECTION_ACTIONS: [&str; 2] = ["iam:GetPolicy", "iam:GetPolicyVersion"];

/// Errors from parsing policy documents.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("cannot parse policy document: {0}")]
    Parse(String),

    #[error("cannot serialize policy document: {0}")]
    Serialize(String),
}

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// IAM accepts either a single string or a list for `Action` and `Resource`.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// `Statement` may also be a single object.
fn one_or_many_statements<'de, D>(deserializer: D) -> Result<Vec<Statement>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Statements {
        Many(Vec<Statement>),
        One(Box<Statement>),
    }

    Ok(match Statements::deserialize(deserializer)? {
        Statements::Many(statements) => statements,
        Statements::One(statement) => vec![*statement],
    })
}

/// A single policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Optional statement identifier (ignored for comparison).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub action: Vec<String>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub resource: Vec<String>,
    /// Every other member, keyed by its wire name.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Statement {
    /// Build an `Allow` statement.
    pub fn allow(sid: &str, actions: &[&str], resources: Vec<String>) -> Self {
        Self {
            sid: Some(sid.to_string()),
            effect: Effect::Allow,
            action: actions.iter().map(|a| a.to_string()).collect(),
            resource: resources,
            extra: BTreeMap::new(),
        }
    }

    fn normalized(&self) -> Self {
        let mut action = self.action.clone();
        action.sort();
        action.dedup();
        let mut resource = self.resource.clone();
        resource.sort();
        resource.dedup();
        Self {
            sid: None,
            effect: self.effect,
            action,
            resource,
            extra: self
                .extra
                .iter()
                .map(|(key, value)| (key.clone(), canonical(value)))
                .collect(),
        }
    }

    /// Stable text form of the unmodeled members, for ordering and hashing.
    fn extra_key(&self) -> String {
        serde_json::to_string(&self.extra).unwrap_or_default()
    }
}

/// `arn:aws:iam::*:user/<path>/<name>`, any account.
fn user_arn_pattern(principal: &PrincipalName, path: &str) -> String {
    match path.trim_matches('/') {
        "" => format!("arn:aws:iam::*:user/{}", principal),
        path => format!("arn:aws:iam::*:user/{}/{}", path, principal),
    }
}

/// IAM treats a lone string and a list as the same set, in any order.
fn canonical(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::Array(vec![Value::String(s.clone())]),
        Value::Array(items) if items.iter().all(Value::is_string) => {
            let mut strings: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            strings.sort_unstable();
            strings.dedup();
            Value::Array(strings.into_iter().map(|s| Value::String(s.to_string())).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), canonical(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Wire form of a policy document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyBody {
    version: String,
    #[serde(deserialize_with = "one_or_many_statements")]
    statement: Vec<Statement>,
}

/// A named policy document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    name: PolicyName,
    statements: Vec<Statement>,
}

impl PolicyDocument {
    /// Create a document from explicit statements.
    pub fn new(name: PolicyName, statements: Vec<Statement>) -> Self {
        Self { name, statements }
    }

    /// The least-privilege document for a principal that reads and writes
    /// objects in one bucket.
    ///
    /// # Example
    ///
    /// ```
    /// use keyrelay::core::policy::PolicyDocument;
    /// use keyrelay::core::types::{BucketName, PolicyName, PrincipalName};
    ///
    /// let user = PrincipalName::new("svc-user").unwrap();
    /// let doc = PolicyDocument::for_bucket(
    ///     PolicyName::default_for(&user),
    ///     &user,
    ///     &BucketName::new("data-bucket").unwrap(),
    ///     false,
    /// );
    /// assert!(doc.actions().all(|a| a.starts_with("s3:")));
    /// ```
    pub fn for_bucket(
        name: PolicyName,
        principal: &PrincipalName,
        bucket: &BucketName,
        include_introspection: bool,
    ) -> Self {
        Self::for_bucket_at(name, principal, "/", bucket, include_introspection)
    }

    /// [`for_bucket`](Self::for_bucket) for a principal created under the
    /// IAM path `principal_path`. The path is part of the user ARN, so the
    /// introspection grant has to name it.
    pub fn for_bucket_at(
        name: PolicyName,
        principal: &PrincipalName,
        principal_path: &str,
        bucket: &BucketName,
        include_introspection: bool,
    ) -> Self {
        let mut statements = vec![
            Statement::allow("BucketAccess", &BUCKET_ACTIONS, vec![bucket.arn()]),
            Statement::allow("ObjectAccess", &OBJECT_ACTIONS, vec![bucket.objects_arn()]),
        ];

        if include_introspection {
            statements.push(Statement::allow(
                "SelfUserIntrospection",
                &USER_INTROSPECTION_ACTIONS,
                vec![user_arn_pattern(principal, principal_path)],
            ));
            statements.push(Statement::allow(
                "SelfPolicyIntrospection",
                &POLICY_INTROSPECTION_ACTIONS,
                vec![format!("arn:aws:iam::*:policy/{}", name)],
            ));
        }

        Self { name, statements }
    }

    /// Parse a JSON policy body and attach a name to it.
    pub fn from_json(name: PolicyName, json: &str) -> Result<Self, PolicyError> {
        let body: PolicyBody =
            serde_json::from_str(json).map_err(|e| PolicyError::Parse(e.to_string()))?;
        Ok(Self {
            name,
            statements: body.statement,
        })
    }

    /// Render the JSON policy body.
    pub fn to_json(&self) -> Result<String, PolicyError> {
        let body = PolicyBody {
            version: POLICY_VERSION.to_string(),
            statement: self.statements.clone(),
        };
        serde_json::to_string_pretty(&body).map_err(|e| PolicyError::Serialize(e.to_string()))
    }

    /// Policy name.
    pub fn name(&self) -> &PolicyName {
        &self.name
    }

    /// Statements in declaration order.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Every action mentioned by any statement.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .flat_map(|s| s.action.iter().map(String::as_str))
    }

    /// Every resource mentioned by any statement.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .flat_map(|s| s.resource.iter().map(String::as_str))
    }

    /// Order-independent normal form of the statements.
    pub fn normalized_statements(&self) -> Vec<Statement> {
        let mut statements: Vec<Statement> =
            self.statements.iter().map(Statement::normalized).collect();
        statements.sort_by_cached_key(|s| {
            (s.effect, s.action.clone(), s.resource.clone(), s.extra_key())
        });
        statements.dedup();
        statements
    }

    /// SHA-256 over the normalized statements, hex encoded.
    pub fn fingerprint(&self) -> String {
        let normalized = self.normalized_statements();
        let mut hasher = Sha256::new();
        for statement in &normalized {
            hasher.update(format!("{:?}", statement.effect).as_bytes());
            hasher.update([0u8]);
            for action in &statement.action {
                hasher.update(action.as_bytes());
                hasher.update([1u8]);
            }
            hasher.update([0u8]);
            for resource in &statement.resource {
                hasher.update(resource.as_bytes());
                hasher.update([1u8]);
            }
            if !statement.extra.is_empty() {
                hasher.update([0u8]);
                hasher.update(statement.extra_key().as_bytes());
            }
            hasher.update([2u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Whether two documents grant the same permissions, ignoring order and names.
    pub fn is_equivalent(&self, other: &PolicyDocument) -> bool {
        self.normalized_statements() == other.normalized_statements()
    }
}
