//! Client Command Routing
//!
//! Inbound client messages are JSON objects tagged by `Request`:
//!
//! | Request | Gateway call | Reply |
//! |---|---|---|
//! | `QUERYALLINSTRUMENT` | `query_all_instrument(Type)` | gateway reply |
//! | `QUERYINSTRUMENTINFO` | `query_instrument_info(Symbol)` | gateway reply |
//! | `SUBQUOTE` / `UNSUBQUOTE` | `subscribe(verb, Param)` | `{"Reply": verb, "Success": "OK"/"FAIL"}` |
//! | `GETHISDATA` | `get_histories(Param)` | one message per record |
//!
//! Unknown verbs are ignored. A gateway error is sent back as its text.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::connection::InboundHandler;
use crate::application::ports::{GatewayError, QuoteGateway};
use crate::domain::history::HistoryWindow;
use crate::domain::session::{SUCCESS_OK, Verb};
use crate::infrastructure::metrics;

/// `Success` value sent for a rejected subscription.
pub const SUCCESS_FAIL: &str = "FAIL";

/// A client command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "Request")]
pub enum Command {
    /// List instruments of a type.
    #[serde(rename = "QUERYALLINSTRUMENT")]
    QueryAllInstrument {
        /// Instrument type (`Fut`, `Opt`, ...).
        #[serde(rename = "Type")]
        query_type: String,
    },

    /// Look up one instrument.
    #[serde(rename = "QUERYINSTRUMENTINFO")]
    QueryInstrumentInfo {
        /// Instrument symbol.
        #[serde(rename = "Symbol")]
        symbol: String,
    },

    /// Subscribe to quotes.
    #[serde(rename = "SUBQUOTE")]
    SubQuote {
        /// Passed through as the gateway `Param`.
        #[serde(rename = "Param", default)]
        param: Value,
    },

    /// Unsubscribe from quotes.
    #[serde(rename = "UNSUBQUOTE")]
    UnsubQuote {
        /// Passed through as the gateway `Param`.
        #[serde(rename = "Param", default)]
        param: Value,
    },

    /// Stream a history window.
    #[serde(rename = "GETHISDATA")]
    GetHisData {
        /// Window to page through.
        #[serde(rename = "Param")]
        window: HistoryWindow,
    },

    /// Any other verb.
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Metrics label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::QueryAllInstrument { .. } => "QUERYALLINSTRUMENT",
            Self::QueryInstrumentInfo { .. } => "QUERYINSTRUMENTINFO",
            Self::SubQuote { .. } => "SUBQUOTE",
            Self::UnsubQuote { .. } => "UNSUBQUOTE",
            Self::GetHisData { .. } => "GETHISDATA",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Why an inbound message was dropped.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Not JSON.
    #[error("malformed JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// A known verb with missing or mistyped fields.
    #[error("invalid {verb} command: {source}")]
    Invalid {
        /// The `Request` value.
        verb: String,
        /// Field error.
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a client message.
///
/// Returns `Ok(None)` for messages without a `Request` field.
///
/// # Errors
///
/// Returns an error for malformed JSON or a known verb with bad fields.
pub fn parse_command(text: &str) -> Result<Option<Command>, CommandError> {
    let value: Value = serde_json::from_str(text).map_err(CommandError::Json)?;
    let Some(verb) = value.get("Request").and_then(Value::as_str).map(str::to_string) else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| CommandError::Invalid { verb, source })
}

/// Routes client commands to the quote gateway.
pub struct CommandRouter {
    gateway: Arc<dyn QuoteGateway>,
}

impl CommandRouter {
    /// Create a router over `gateway`.
    #[must_use]
    pub fn new(gateway: Arc<dyn QuoteGateway>) -> Self {
        Self { gateway }
    }

    /// Parse and execute one client message, replying on `out`.
    pub async fn handle(&self, text: &str, out: &mpsc::Sender<String>) {
        match parse_command(text) {
            Ok(Some(command)) => self.execute(command, out).await,
            Ok(None) => tracing::debug!("Client message without Request, ignoring"),
            Err(e) => tracing::warn!(error = %e, "Dropping client message"),
        }
    }

    /// Execute a parsed command, replying on `out`.
    ///
    /// Stops early if the client's queue is closed.
    pub async fn execute(&self, command: Command, out: &mpsc::Sender<String>) {
        metrics::record_client_command(command.name());

        let reply = match command {
            Command::QueryAllInstrument { query_type } => {
                self.gateway.query_all_instrument(query_type).await.map(|r| r.to_string())
            }
            Command::QueryInstrumentInfo { symbol } => {
                self.gateway.query_instrument_info(symbol).await.map(|r| r.to_string())
            }
            Command::SubQuote { param } => self.subscribe(Verb::SubQuote, param).await,
            Command::UnsubQuote { param } => self.subscribe(Verb::UnsubQuote, param).await,
            Command::GetHisData { window } => {
                self.stream_histories(window, out).await;
                return;
            }
            Command::Unknown => return,
        };

        let text = reply.unwrap_or_else(|e| error_text(&e));
        // A closed queue means the client left; nothing to report to.
        let _ = out.send(text).await;
    }

    async fn subscribe(&self, verb: Verb, param: Value) -> Result<String, GatewayError> {
        let accepted = self.gateway.subscribe(verb, param).await?;
        let success = if accepted { SUCCESS_OK } else { SUCCESS_FAIL };
        Ok(json!({"Reply": verb.as_str(), "Success": success}).to_string())
    }

    async fn stream_histories(&self, window: HistoryWindow, out: &mpsc::Sender<String>) {
        let symbol = window.symbol.clone();
        let mut histories = self.gateway.get_histories(window);
        let mut sent = 0_usize;

        while let Some(item) = histories.next().await {
            let text = match item {
                Ok(record) => match serde_json::to_string(&record) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode history record");
                        continue;
                    }
                },
                Err(e) => {
                    let _ = out.send(error_text(&e)).await;
                    return;
                }
            };
            if out.send(text).await.is_err() {
                tracing::debug!(symbol = %symbol, sent, "Client left during history stream");
                return;
            }
            sent += 1;
        }

        tracing::debug!(symbol = %symbol, sent, "History stream finished");
    }
}

fn error_text(e: &GatewayError) -> String {
    tracing::warn!(error = %e, kind = e.kind(), "Gateway call failed for client command");
    e.to_string()
}

#[async_trait]
impl InboundHandler for CommandRouter {
    async fn on_text(&self, text: String, out: &mpsc::Sender<String>) {
        self.handle(&text, out).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockQuoteGateway;
    use crate::domain::history::HistoryRecord;
    use futures::stream;
    use mockall::predicate::eq;
    use test_case::test_case;

    fn router(mock: MockQuoteGateway) -> CommandRouter {
        CommandRouter::new(Arc::new(mock))
    }

    async fn run(router: &CommandRouter, text: &str) -> Vec<String> {
        let (tx, mut rx) = mpsc::channel(16);
        router.handle(text, &tx).await;
        drop(tx);
        let mut replies = Vec::new();
        while let Some(reply) = rx.recv().await {
            replies.push(reply);
        }
        replies
    }

    #[test_case(r#"{"Request":"QUERYALLINSTRUMENT","Type":"Fut"}"#, "QUERYALLINSTRUMENT")]
    #[test_case(r#"{"Request":"QUERYINSTRUMENTINFO","Symbol":"X"}"#, "QUERYINSTRUMENTINFO")]
    #[test_case(r#"{"Request":"SUBQUOTE","Param":{}}"#, "SUBQUOTE")]
    #[test_case(r#"{"Request":"UNSUBQUOTE"}"#, "UNSUBQUOTE")]
    #[test_case(r#"{"Request":"LOGIN"}"#, "UNKNOWN")]
    fn parses_verbs(text: &str, name: &str) {
        assert_eq!(parse_command(text).unwrap().unwrap().name(), name);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(parse_command("{not json"), Err(CommandError::Json(_))));
        assert!(matches!(
            parse_command(r#"{"Request":"QUERYINSTRUMENTINFO"}"#),
            Err(CommandError::Invalid { .. })
        ));
        assert!(parse_command(r#"{"Type":"Fut"}"#).unwrap().is_none());
    }

    #[tokio::test]
    async fn subquote_calls_subscribe_once_and_replies_ok() {
        let mut mock = MockQuoteGateway::new();
        mock.expect_subscribe()
            .with(
                eq(Verb::SubQuote),
                eq(json!({"Symbol": "X", "SubDataType": "REALTIME"})),
            )
            .times(1)
            .returning(|_, _| Ok(true));

        let replies = run(
            &router(mock),
            r#"{"Request":"SUBQUOTE","Param":{"Symbol":"X","SubDataType":"REALTIME"}}"#,
        )
        .await;

        assert_eq!(replies, vec![r#"{"Reply":"SUBQUOTE","Success":"OK"}"#.to_string()]);
    }

    #[tokio::test]
    async fn unsubquote_rejected_replies_fail() {
        let mut mock = MockQuoteGateway::new();
        mock.expect_subscribe()
            .with(eq(Verb::UnsubQuote), eq(json!({"Symbol": "X"})))
            .times(1)
            .returning(|_, _| Ok(false));

        let replies = run(&router(mock), r#"{"Request":"UNSUBQUOTE","Param":{"Symbol":"X"}}"#).await;

        assert_eq!(replies, vec![r#"{"Reply":"UNSUBQUOTE","Success":"FAIL"}"#.to_string()]);
    }

    #[tokio::test]
    async fn subscribe_error_replies_with_text() {
        let mut mock = MockQuoteGateway::new();
        mock.expect_subscribe()
            .returning(|_, _| Err(GatewayError::SubscribeFailure("no such symbol".into())));

        let replies = run(&router(mock), r#"{"Request":"SUBQUOTE","Param":{"Symbol":"X"}}"#).await;

        assert_eq!(replies, vec!["subscribe failed: no such symbol".to_string()]);
    }

    #[tokio::test]
    async fn query_replies_verbatim() {
        let mut mock = MockQuoteGateway::new();
        mock.expect_query_all_instrument()
            .with(eq("Opt".to_string()))
            .times(1)
            .returning(|_| {
                Ok(json!({"Reply": "QUERYALLINSTRUMENT", "Success": "OK", "Instruments": []}))
            });
        mock.expect_query_instrument_info()
            .with(eq("TC.F.TWF.FITX.HOT".to_string()))
            .times(1)
            .returning(|_| Ok(json!({"Reply": "QUERYINSTRUMENTINFO", "Success": "OK"})));
        let router = router(mock);

        let all = run(&router, r#"{"Request":"QUERYALLINSTRUMENT","Type":"Opt"}"#).await;
        let info = run(&router, r#"{"Request":"QUERYINSTRUMENTINFO","Symbol":"TC.F.TWF.FITX.HOT"}"#).await;

        let all: Value = serde_json::from_str(&all[0]).unwrap();
        assert_eq!(all["Instruments"], json!([]));
        let info: Value = serde_json::from_str(&info[0]).unwrap();
        assert_eq!(info["Reply"], json!("QUERYINSTRUMENTINFO"));
    }

    #[tokio::test]
    async fn history_streams_each_record_in_order() {
        let window = HistoryWindow::new("X", "1K", "2024010100", "2024010200");
        let records: Vec<HistoryRecord> = (0..3)
            .map(|i| {
                let row = json!({"Close": i, "QryIndex": i});
                HistoryRecord::from_row(&window, row.as_object().unwrap().clone())
            })
            .collect();

        let mut mock = MockQuoteGateway::new();
        mock.expect_get_histories()
            .with(eq(window.clone()))
            .times(1)
            .returning(move |_| {
                Box::pin(stream::iter(
                    records.clone().into_iter().map(Ok::<_, GatewayError>),
                ))
            });

        let replies = run(
            &router(mock),
            r#"{"Request":"GETHISDATA","Param":{"Symbol":"X","SubDataType":"1K","StartTime":"2024010100","EndTime":"2024010200"}}"#,
        )
        .await;

        assert_eq!(replies.len(), 3);
        for (i, reply) in replies.iter().enumerate() {
            let value: Value = serde_json::from_str(reply).unwrap();
            assert_eq!(value["HisData"]["Close"], json!(i));
            assert_eq!(value["HisData"]["Symbol"], json!("X"));
        }
    }

    #[tokio::test]
    async fn history_error_ends_stream_with_text() {
        let mut mock = MockQuoteGateway::new();
        mock.expect_get_histories().returning(|_| {
            Box::pin(stream::iter(vec![Err::<HistoryRecord, _>(
                GatewayError::SessionIllegal("the Session is illegal".into()),
            )]))
        });

        let replies = run(
            &router(mock),
            r#"{"Request":"GETHISDATA","Param":{"Symbol":"X","SubDataType":"1K","StartTime":"a","EndTime":"b"}}"#,
        )
        .await;

        assert_eq!(replies, vec!["session is illegal: the Session is illegal".to_string()]);
    }

    #[tokio::test]
    async fn unknown_and_malformed_messages_are_silent() {
        // No expectations: any gateway call would panic.
        let router = router(MockQuoteGateway::new());

        assert!(run(&router, r#"{"Request":"NEWORDER","Param":{}}"#).await.is_empty());
        assert!(run(&router, "not json").await.is_empty());
        assert!(run(&router, r#"{"Request":"GETHISDATA"}"#).await.is_empty());
    }
}
