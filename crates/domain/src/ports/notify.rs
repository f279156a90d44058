use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),
    #[error("notify failed: {0}")]
    Delivery(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    ChurnRisk,
    EngagementAnomaly,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationKind::ChurnRisk => "churn_risk",
            RecommendationKind::EngagementAnomaly => "engagement_anomaly",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
}

impl RecommendationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationPriority::Low => "low",
            RecommendationPriority::Medium => "medium",
            RecommendationPriority::High => "high",
        }
    }
}

/// Outbound record for the notification subsystem. Fire-and-forget: the
/// core never waits on or reacts to delivery.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: RecommendationPriority,
    pub message: String,
    pub action: String,
    pub scope_id: String,
    pub user_id: Option<String>,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, recommendation: &Recommendation) -> BoxFuture<'_, Result<(), NotifyError>>;
}

/// Collects recommendations in memory; used by the test suites.
#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    inner: Arc<Mutex<Vec<Recommendation>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Recommendation> {
        let mut guard = self.inner.lock().expect("notifier lock");
        std::mem::take(&mut *guard)
    }

    pub fn snapshot(&self) -> Vec<Recommendation> {
        self.inner.lock().expect("notifier lock").clone()
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, recommendation: &Recommendation) -> BoxFuture<'_, Result<(), NotifyError>> {
        let inner = self.inner.clone();
        let recommendation = recommendation.clone();
        Box::pin(async move {
            inner
                .lock()
                .expect("notifier lock")
                .push(recommendation);
            Ok(())
        })
    }
}
