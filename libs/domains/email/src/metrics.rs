//! Email delivery metrics
//!
//! Recorded through the `metrics` facade; the recorder installed by
//! `job_worker::init_metrics` exports them.

use metrics::counter;

use crate::models::ProviderKind;

#[derive(Clone, Copy, Default)]
pub struct EmailMetrics;

impl EmailMetrics {
    pub fn send_attempted(&self, provider: ProviderKind, success: bool) {
        counter!(
            "email_sends_total",
            "provider" => provider.to_string(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    /// Router picked something other than the caller's preference
    pub fn provider_rerouted(&self, from: ProviderKind, to: ProviderKind) {
        counter!(
            "email_provider_reroutes_total",
            "from" => from.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }

    pub fn reconnect_flagged(&self, provider: ProviderKind) {
        counter!("email_reconnect_flags_total", "provider" => provider.to_string()).increment(1);
    }

    pub fn queue_item_finished(&self, status: &str) {
        counter!("email_queue_items_total", "status" => status.to_string()).increment(1);
    }

    pub fn campaign_completed(&self) {
        counter!("email_campaigns_completed_total").increment(1);
    }
}
