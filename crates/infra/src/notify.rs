use metrics::counter;
use pulse_domain::ports::BoxFuture;
use pulse_domain::ports::notify::{Notifier, NotifyError, Recommendation};
use tracing::info;

const RECOMMENDATIONS_EMITTED_TOTAL: &str = "pulse_recommendations_emitted_total";

/// Hands recommendations to the delivery subsystem by structured log line;
/// downstream shipping is someone else's concern and nothing here waits on
/// it.
#[derive(Clone, Debug, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for TracingNotifier {
    fn notify(&self, recommendation: &Recommendation) -> BoxFuture<'_, Result<(), NotifyError>> {
        let recommendation = recommendation.clone();
        Box::pin(async move {
            info!(
                kind = recommendation.kind.as_str(),
                priority = recommendation.priority.as_str(),
                scope_id = %recommendation.scope_id,
                user_id = recommendation.user_id.as_deref().unwrap_or(""),
                action = %recommendation.action,
                message = %recommendation.message,
                "recommendation emitted"
            );
            counter!(
                RECOMMENDATIONS_EMITTED_TOTAL,
                "kind" => recommendation.kind.as_str().to_string()
            )
            .increment(1);
            Ok(())
        })
    }
}
