//! History Pager
//!
//! Drives the gateway's cursor-based history protocol:
//!
//! 1. SUBQUOTE the window (a rejected subscribe is logged and ignored)
//! 2. one PONG to prime the channel
//! 3. GETHISDATA with cursor `""`, then with the last row's `QryIndex`
//!
//! Empty pages before any data arrives are retried after a backoff until
//! the retry budget runs out; the gateway is still assembling the result
//! set. An empty page after data has flowed ends the sequence.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::application::ports::{GatewayError, HistoryStream};
use crate::domain::history::{HistoryPolicy, HistoryRecord, HistoryWindow, page_rows};

/// Gateway operations the pager needs.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// SUBQUOTE the window.
    async fn subscribe_history(&self, window: &HistoryWindow) -> Result<bool, GatewayError>;

    /// Send a PONG with the given id.
    async fn pong(&self, id: &str) -> Result<Value, GatewayError>;

    /// Fetch one GETHISDATA page at `cursor`.
    async fn get_history(
        &self,
        window: &HistoryWindow,
        cursor: &Value,
    ) -> Result<Value, GatewayError>;
}

/// Produces lazy history sequences from a [`HistorySource`].
pub struct HistoryPager<S: ?Sized> {
    source: Arc<S>,
    policy: HistoryPolicy,
}

impl<S: HistorySource + ?Sized + 'static> HistoryPager<S> {
    /// Create a pager.
    #[must_use]
    pub const fn new(source: Arc<S>, policy: HistoryPolicy) -> Self {
        Self { source, policy }
    }

    /// Start a history query.
    ///
    /// Nothing is sent until the stream is first polled. The stream is
    /// finite and not restartable; call again for a fresh query.
    #[must_use]
    pub fn stream(&self, window: HistoryWindow) -> HistoryStream {
        let pager = PagerState {
            source: Arc::clone(&self.source),
            backoff: self.policy.backoff,
            budget: self.policy.retry_budget,
            window,
            cursor: Value::String(String::new()),
            has_data: false,
            buffered: VecDeque::new(),
            phase: Phase::Prime,
        };

        Box::pin(stream::unfold(pager, |mut pager| async move {
            let item = pager.next_record().await?;
            Some((item, pager))
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prime,
    Paging,
    Done,
}

struct PagerState<S: ?Sized> {
    source: Arc<S>,
    backoff: Duration,
    budget: u32,
    window: HistoryWindow,
    cursor: Value,
    has_data: bool,
    buffered: VecDeque<HistoryRecord>,
    phase: Phase,
}

impl<S: HistorySource + ?Sized> PagerState<S> {
    async fn next_record(&mut self) -> Option<Result<HistoryRecord, GatewayError>> {
        loop {
            if let Some(record) = self.buffered.pop_front() {
                return Some(Ok(record));
            }

            let step = match self.phase {
                Phase::Done => return None,
                Phase::Prime => self.prime().await,
                Phase::Paging => self.fetch_page().await,
            };

            if let Err(e) = step {
                self.phase = Phase::Done;
                return Some(Err(e));
            }
        }
    }

    async fn prime(&mut self) -> Result<(), GatewayError> {
        match self.source.subscribe_history(&self.window).await {
            Ok(accepted) => {
                tracing::debug!(
                    symbol = %self.window.symbol,
                    data_type = %self.window.data_type,
                    accepted,
                    "History subscription sent"
                );
            }
            Err(GatewayError::SubscribeFailure(msg)) => {
                tracing::warn!(
                    symbol = %self.window.symbol,
                    error = %msg,
                    "History subscription rejected, paging anyway"
                );
            }
            Err(e) => return Err(e),
        }

        self.source.pong("").await?;
        self.phase = Phase::Paging;
        Ok(())
    }

    async fn fetch_page(&mut self) -> Result<(), GatewayError> {
        let reply = self.source.get_history(&self.window, &self.cursor).await?;
        let rows = page_rows(&reply);

        if rows.is_empty() {
            self.budget = self.budget.saturating_sub(1);
            if self.budget == 0 || self.has_data {
                tracing::debug!(
                    symbol = %self.window.symbol,
                    has_data = self.has_data,
                    "History paging finished"
                );
                self.phase = Phase::Done;
            } else {
                tokio::time::sleep(self.backoff).await;
            }
            return Ok(());
        }

        self.has_data = true;
        self.buffered = rows
            .into_iter()
            .map(|row| HistoryRecord::from_row(&self.window, row))
            .collect();

        match self.buffered.back().and_then(HistoryRecord::qry_index) {
            Some(cursor) => self.cursor = cursor.clone(),
            None => {
                tracing::warn!(
                    symbol = %self.window.symbol,
                    "History page without QryIndex, stopping after it"
                );
                self.phase = Phase::Done;
            }
        }

        Ok(())
    }
}
