//! `Feedback.*` (§6.1).

use std::sync::Arc;

use crate::error::EngineResult;
use crate::feedback::FeedbackService;
use crate::models::{Feedback, FeedbackStats, NewFeedback};

pub struct FeedbackApi {
    service: Arc<FeedbackService>,
}

impl FeedbackApi {
    pub fn new(service: Arc<FeedbackService>) -> Self {
        Self { service }
    }

    pub async fn submit(&self, new: NewFeedback) -> EngineResult<Feedback> {
        self.service.submit(new).await
    }

    pub async fn stats(&self, connection_id: Option<i64>) -> EngineResult<FeedbackStats> {
        self.service.stats(connection_id).await
    }
}
