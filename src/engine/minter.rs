//! engine::minter
//!
//! Mint a fresh access key pair for a principal.
//!
//! # Invariants
//!
//! - The live key count is checked before minting; a principal at its
//!   limit fails with `QuotaExceeded` and nothing is created
//! - Keys are never revoked here; freeing a slot is an operator decision
//! - `CreateAccessKey` is never retried: a retry after a lost response
//!   would leave an unseen second key behind
//! - The secret half exists only in the returned [`CredentialPair`]

use super::retry::RetryPolicy;
use crate::account::{AccessKeyInfo, AccountApi};
use crate::core::error::ApiError;
use crate::core::secret::CredentialPair;
use crate::core::types::PrincipalName;

/// Access key minting over an [`AccountApi`].
pub struct CredentialMinter<'a> {
    account: &'a dyn AccountApi,
    retry: &'a RetryPolicy,
    max_keys: usize,
}

impl<'a> CredentialMinter<'a> {
    pub fn new(account: &'a dyn AccountApi, retry: &'a RetryPolicy, max_keys: u32) -> Self {
        Self {
            account,
            retry,
            max_keys: max_keys as usize,
        }
    }

    /// Keys currently held by the principal, active or not.
    pub async fn live_keys(&self, principal: &PrincipalName) -> Result<Vec<AccessKeyInfo>, ApiError> {
        self.retry
            .run("ListAccessKeys", || self.account.list_access_keys(principal))
            .await
    }

    /// Whether one more key fits under the limit.
    pub fn has_capacity(&self, live: &[AccessKeyInfo]) -> bool {
        live.len() < self.max_keys
    }

    /// Create a new key pair for `principal`.
    pub async fn mint(&self, principal: &PrincipalName) -> Result<CredentialPair, ApiError> {
        let live = self.live_keys(principal).await?;
        self.mint_with(principal, &live).await
    }

    /// Like [`mint`](Self::mint), checking the limit against keys the
    /// caller already listed.
    pub async fn mint_with(
        &self,
        principal: &PrincipalName,
        live: &[AccessKeyInfo],
    ) -> Result<CredentialPair, ApiError> {
        if !self.has_capacity(live) {
            let ids: Vec<&str> = live.iter().map(|k| k.access_id.as_str()).collect();
            return Err(ApiError::QuotaExceeded(format!(
                "principal '{}' holds {} of {} access keys ({})",
                principal,
                live.len(),
                self.max_keys,
                ids.join(", ")
            )));
        }

        let pair = self
            .retry
            .once("CreateAccessKey", self.account.create_access_key(principal))
            .await?;

        if pair.access_id.is_empty() || pair.access_secret.is_empty() {
            return Err(ApiError::Malformed(format!(
                "CreateAccessKey for '{}' returned an incomplete key pair",
                principal
            )));
        }

        tracing::info!(
            principal = %principal,
            access_id = %pair.access_id,
            "minted access key"
        );
        Ok(pair)
    }
}
