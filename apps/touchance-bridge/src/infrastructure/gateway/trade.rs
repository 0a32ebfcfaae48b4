//! Trade service operations.
//!
//! Order parameters are passed through as the gateway's `Param` object.
//! NEWORDER rejects carry an `ErrCode` that is classified against the
//! reject table.

use serde_json::Value;

use super::client::GatewayClient;
use super::request::GatewayRequest;
use crate::application::ports::GatewayError;
use crate::domain::session::Verb;

impl GatewayClient {
    /// List trading accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn accounts(&self) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::Accounts)).await
    }

    /// Replay order reports from `qry_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn restore_report(&self, qry_index: Value) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::RestoreReport).field("QryIndex", qry_index)).await
    }

    /// Place an order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NewOrderFailure`] or
    /// [`GatewayError::UnknownOrderError`] for rejected orders, or any other
    /// request error.
    pub async fn new_order(&self, param: Value) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::NewOrder).param(param)).await
    }

    /// Amend an order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn replace_order(&self, param: Value) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::ReplaceOrder).param(param)).await
    }

    /// Cancel an order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn cancel_order(&self, param: Value) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::CancelOrder).param(param)).await
    }

    /// Margins of the accounts matching `account_mask`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn margins(&self, account_mask: &str) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::Margins).field("AccountMask", account_mask)).await
    }

    /// Positions of the accounts matching `account_mask`, from `qry_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn positions(
        &self,
        account_mask: &str,
        qry_index: Value,
    ) -> Result<Value, GatewayError> {
        let request = GatewayRequest::new(Verb::Positions)
            .field("AccountMask", account_mask)
            .field("QryIndex", qry_index);
        self.send(request).await
    }

    /// Replay fill reports from `qry_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn restore_fill_report(&self, qry_index: Value) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::RestoreFillReport).field("QryIndex", qry_index)).await
    }
}
