//! Quote service operations: realtime, greeks and history.

use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};

use super::client::GatewayClient;
use super::request::GatewayRequest;
use crate::application::ports::{GatewayError, HistoryStream, QuoteGateway};
use crate::application::services::{HistoryPager, HistorySource};
use crate::domain::history::HistoryWindow;
use crate::domain::session::Verb;

/// Default `GreeksType`.
pub const DEFAULT_GREEKS_TYPE: &str = "REAL";

fn realtime_param(symbol: &str) -> Value {
    json!({"Symbol": symbol, "SubDataType": "REALTIME"})
}

fn greeks_param(symbol: &str, greeks_type: &str) -> Value {
    json!({"Symbol": symbol, "SubDataType": "GREEKS", "GreeksType": greeks_type})
}

fn history_param(window: &HistoryWindow) -> Value {
    json!({
        "Symbol": window.symbol,
        "SubDataType": window.data_type,
        "StartTime": window.start_time,
        "EndTime": window.end_time,
    })
}

impl GatewayClient {
    /// Subscribe to realtime quotes.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway rejects the subscription.
    pub async fn subscribe_quote(&self, symbol: &str) -> Result<bool, GatewayError> {
        self.subscribe(Verb::SubQuote, realtime_param(symbol)).await
    }

    /// Unsubscribe from realtime quotes.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway rejects the request.
    pub async fn unsubscribe_quote(&self, symbol: &str) -> Result<bool, GatewayError> {
        self.subscribe(Verb::UnsubQuote, realtime_param(symbol)).await
    }

    /// Subscribe to option greeks; `greeks_type` is usually
    /// [`DEFAULT_GREEKS_TYPE`].
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway rejects the subscription.
    pub async fn subscribe_greeks(
        &self,
        symbol: &str,
        greeks_type: &str,
    ) -> Result<bool, GatewayError> {
        self.subscribe(Verb::SubQuote, greeks_param(symbol, greeks_type)).await
    }

    /// Unsubscribe from option greeks.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway rejects the request.
    pub async fn unsubscribe_greeks(
        &self,
        symbol: &str,
        greeks_type: &str,
    ) -> Result<bool, GatewayError> {
        self.subscribe(Verb::UnsubQuote, greeks_param(symbol, greeks_type)).await
    }

    /// Ask the gateway to prepare a history window.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway rejects the subscription.
    pub async fn subscribe_history(&self, window: &HistoryWindow) -> Result<bool, GatewayError> {
        self.subscribe(Verb::SubQuote, history_param(window)).await
    }

    /// Release a history window.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway rejects the request.
    pub async fn unsubscribe_history(
        &self,
        window: &HistoryWindow,
    ) -> Result<bool, GatewayError> {
        self.subscribe(Verb::UnsubQuote, history_param(window)).await
    }

    /// Fetch one history page at `cursor` (`""` for the first page).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_history(
        &self,
        window: &HistoryWindow,
        cursor: &Value,
    ) -> Result<Value, GatewayError> {
        let mut param = history_param(window);
        if let Some(param) = param.as_object_mut() {
            param.insert("QryIndex".to_string(), cursor.clone());
        }
        self.send(GatewayRequest::new(Verb::GetHisData).param(param)).await
    }
}

#[async_trait]
impl HistorySource for GatewayClient {
    async fn subscribe_history(&self, window: &HistoryWindow) -> Result<bool, GatewayError> {
        Self::subscribe_history(self, window).await
    }

    async fn pong(&self, id: &str) -> Result<Value, GatewayError> {
        Self::pong(self, id).await
    }

    async fn get_history(
        &self,
        window: &HistoryWindow,
        cursor: &Value,
    ) -> Result<Value, GatewayError> {
        Self::get_history(self, window, cursor).await
    }
}

#[async_trait]
impl QuoteGateway for GatewayClient {
    async fn query_all_instrument(&self, query_type: String) -> Result<Value, GatewayError> {
        Self::query_all_instrument(self, &query_type).await
    }

    async fn query_instrument_info(&self, symbol: String) -> Result<Value, GatewayError> {
        Self::query_instrument_info(self, &symbol).await
    }

    async fn subscribe(&self, verb: Verb, param: Value) -> Result<bool, GatewayError> {
        Self::subscribe(self, verb, param).await
    }

    fn get_histories(&self, window: HistoryWindow) -> HistoryStream {
        match self.arc() {
            Some(client) => HistoryPager::new(client, self.config().history).stream(window),
            None => Box::pin(stream::once(async { Err(GatewayError::NotConnected) })),
        }
    }
}
