use std::sync::atomic::{AtomicU64, Ordering};

/// writer 的计数指标，由外部注入共享，writer 只做递增
#[derive(Debug, Default)]
pub struct WriterMetrics {
    messages_resolved: AtomicU64,
    compliance_rejections: AtomicU64,
    votes_submitted: AtomicU64,
    proposals_executed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub messages_resolved: u64,
    pub compliance_rejections: u64,
    pub votes_submitted: u64,
    pub proposals_executed: u64,
}

impl WriterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_resolved(&self) {
        self.messages_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compliance_rejection(&self) {
        self.compliance_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vote(&self) {
        self.votes_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self) {
        self.proposals_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_resolved: self.messages_resolved.load(Ordering::Relaxed),
            compliance_rejections: self.compliance_rejections.load(Ordering::Relaxed),
            votes_submitted: self.votes_submitted.load(Ordering::Relaxed),
            proposals_executed: self.proposals_executed.load(Ordering::Relaxed),
        }
    }
}
