//! Typed wrappers for the tools exposed by a Relatr server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RpcClient;
use crate::{
    error::{Error, Result},
    event::Identity,
};

/// Weighting applied by the server when combining trust components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightingScheme {
    Default,
    Social,
    Validation,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustComponents {
    #[serde(default)]
    pub distance_weight: f64,
    /// Validator name (`nip05Valid`, `lightningAddress`, ...) to score.
    #[serde(default)]
    pub validators: BTreeMap<String, f64>,
    #[serde(default)]
    pub social_distance: f64,
    #[serde(default)]
    pub normalized_distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScore {
    #[serde(default)]
    pub source_pubkey: String,
    #[serde(default)]
    pub target_pubkey: String,
    pub score: f64,
    #[serde(default)]
    pub components: Option<TrustComponents>,
    #[serde(default)]
    pub computed_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateTrustScoreOutput {
    pub trust_score: TrustScore,
    #[serde(default)]
    pub computation_time_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateTrustScoresOutput {
    pub trust_scores: Vec<TrustScore>,
    #[serde(default)]
    pub computation_time_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResult {
    pub pubkey: String,
    pub trust_score: f64,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchProfilesOutput {
    pub results: Vec<ProfileResult>,
    pub total_found: u64,
    pub search_time_ms: f64,
}

/// Server statistics. Database and graph sections are passed through as the
/// server reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsOutput {
    #[serde(default)]
    pub database: Value,
    #[serde(default)]
    pub social_graph: Value,
    pub source_pubkey: String,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckOutput {
    pub status: HealthStatus,
    pub database: bool,
    pub social_graph: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Get,
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageSubscriptionOutput {
    pub success: bool,
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<u64>,
    #[serde(default)]
    pub rank: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrustScoreArgs<'a> {
    target_pubkey: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_pubkey: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weighting_scheme: Option<WeightingScheme>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrustScoresArgs<'a> {
    target_pubkeys: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extend_to_nostr: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionArgs<'a> {
    action: SubscriptionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_relays: Option<&'a [String]>,
}

fn to_args<T: Serialize>(args: &T) -> Result<Value> {
    serde_json::to_value(args).map_err(|e| Error::InvalidArgument(e.to_string()))
}

impl RpcClient {
    /// Trust score of `target` as seen from the server's source key, or from
    /// `source` when given.
    pub async fn calculate_trust_score(
        &self,
        target: &Identity,
        source: Option<&Identity>,
        weighting: Option<WeightingScheme>,
    ) -> Result<CalculateTrustScoreOutput> {
        let args = to_args(&TrustScoreArgs {
            target_pubkey: target.as_str(),
            source_pubkey: source.map(Identity::as_str),
            weighting_scheme: weighting,
        })?;
        self.call("calculate_trust_score", args).await
    }

    /// Batch trust scores. `targets` must not be empty.
    pub async fn calculate_trust_scores(
        &self,
        targets: &[Identity],
    ) -> Result<CalculateTrustScoresOutput> {
        if targets.is_empty() {
            return Err(Error::InvalidArgument(
                "calculate_trust_scores needs at least one target".into(),
            ));
        }
        let args = to_args(&TrustScoresArgs {
            target_pubkeys: targets.iter().map(Identity::as_str).collect(),
        })?;
        self.call("calculate_trust_scores", args).await
    }

    /// Profiles matching `query`, ordered by trust score.
    pub async fn search_profiles(
        &self,
        query: &str,
        limit: Option<u32>,
        extend_to_nostr: Option<bool>,
    ) -> Result<SearchProfilesOutput> {
        let args = to_args(&SearchArgs {
            query,
            limit,
            extend_to_nostr,
        })?;
        self.call("search_profiles", args).await
    }

    pub async fn stats(&self) -> Result<StatsOutput> {
        self.call_with_retry("stats", Value::Object(Default::default()))
            .await
    }

    pub async fn health_check(&self) -> Result<HealthCheckOutput> {
        self.call_with_retry("health_check", Value::Object(Default::default()))
            .await
    }

    /// Query or change this client's provider subscription. Only `Get` is
    /// retried.
    pub async fn manage_subscription(
        &self,
        action: SubscriptionAction,
        custom_relays: Option<&[String]>,
    ) -> Result<ManageSubscriptionOutput> {
        let args = to_args(&SubscriptionArgs {
            action,
            custom_relays,
        })?;
        match action {
            SubscriptionAction::Get => self.call_with_retry("manage_subscription", args).await,
            _ => self.call("manage_subscription", args).await,
        }
    }
}
