//! Read-only checks against a real AWS account.
//!
//! Enabled with `--features live_aws_tests`. Credentials come from the
//! usual AWS environment; tests skip when none are configured. Nothing
//! here mutates the account.

#![cfg(feature = "live_aws_tests")]

use keyrelay::account::aws::AwsAccount;
use keyrelay::account::AccountApi;
use keyrelay::core::types::{PolicyName, PrincipalName};

fn has_credentials() -> bool {
    std::env::var("AWS_ACCESS_KEY_ID").is_ok() || std::env::var("AWS_PROFILE").is_ok()
}

#[tokio::test]
async fn live_missing_user_is_none() {
    if !has_credentials() {
        eprintln!("Skipping: no AWS credentials configured");
        return;
    }

    let account = AwsAccount::from_env(None).await;
    let name = PrincipalName::new("keyrelay-live-test-nonexistent").unwrap();

    let user = account.get_user(&name).await.unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn live_missing_policy_is_none() {
    if !has_credentials() {
        eprintln!("Skipping: no AWS credentials configured");
        return;
    }

    let account = AwsAccount::from_env(None).await;
    let name = PolicyName::new("keyrelay-live-test-nonexistent").unwrap();

    let policy = account.find_policy(&name).await.unwrap();
    assert!(policy.is_none());
}
