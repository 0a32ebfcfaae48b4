//! Request building and reply classification.
//!
//! Requests are flat JSON objects:
//!
//! ```json
//! {"Request": "SUBQUOTE", "SessionKey": "...", "Param": {"Symbol": "...", "SubDataType": "REALTIME"}}
//! ```
//!
//! LOGIN is the only request sent without a session key.

use serde_json::{Map, Value};

use crate::application::ports::GatewayError;
use crate::domain::order::{err_code, reject_reason};
use crate::domain::session::{SUCCESS_OK, Verb};

/// Error text the gateway uses for an invalidated session.
pub const SESSION_ILLEGAL: &str = "the Session is illegal";

/// A request to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    verb: Verb,
    fields: Map<String, Value>,
}

impl GatewayRequest {
    /// Start a request for `verb`.
    #[must_use]
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            fields: Map::new(),
        }
    }

    /// Add a top-level field.
    #[must_use]
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Add the `Param` object.
    #[must_use]
    pub fn param(self, param: Value) -> Self {
        self.field("Param", param)
    }

    /// Request verb.
    #[must_use]
    pub const fn verb(&self) -> Verb {
        self.verb
    }

    /// Wire form of the request.
    ///
    /// A missing session key is sent as `null`; the gateway answers with a
    /// session error.
    #[must_use]
    pub fn to_value(&self, session_key: Option<&str>) -> Value {
        let mut body = Map::with_capacity(self.fields.len() + 2);
        body.insert("Request".to_string(), Value::String(self.verb.as_str().to_string()));
        if !self.verb.is_login() {
            body.insert(
                "SessionKey".to_string(),
                session_key.map_or(Value::Null, |k| Value::String(k.to_string())),
            );
        }
        for (key, value) in &self.fields {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}

/// Turn a rejected reply into a typed error.
///
/// A reply is rejected when `Success` is present and not `"OK"` and the
/// gateway explains why, through `ErrMsg`, or through `ErrCode` on NEWORDER.
/// Other replies are returned to the caller unchanged, so a bare
/// `{"Success":"FAIL"}` still reaches it.
///
/// # Errors
///
/// Returns the classified [`GatewayError`] for a rejected reply.
pub fn classify_reply(verb: Verb, reply: &Value) -> Result<(), GatewayError> {
    let Some(success) = reply.get("Success") else {
        return Ok(());
    };
    if success.as_str() == Some(SUCCESS_OK) {
        return Ok(());
    }

    let message = reply.get("ErrMsg").map(|msg| match msg {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    });
    let order_code = match verb {
        Verb::NewOrder => reply.get("ErrCode").and_then(err_code),
        _ => None,
    };

    if let Some(msg) = &message {
        if msg.contains(SESSION_ILLEGAL) {
            return Err(GatewayError::SessionIllegal(msg.clone()));
        }
        if verb.is_subscription() {
            return Err(GatewayError::SubscribeFailure(msg.clone()));
        }
    }

    if let Some(code) = order_code {
        return Err(match reject_reason(&code) {
            Some(reason) => GatewayError::NewOrderFailure { code, reason },
            None => GatewayError::UnknownOrderError { code },
        });
    }

    match message {
        Some(msg) => Err(GatewayError::Gateway(msg)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn login_has_no_session_key() {
        let request = GatewayRequest::new(Verb::Login)
            .param(json!({"SystemName": "ZMQ", "ServiceKey": "secret"}));

        assert_eq!(
            request.to_value(Some("ignored")),
            json!({"Request": "LOGIN", "Param": {"SystemName": "ZMQ", "ServiceKey": "secret"}})
        );
    }

    #[test]
    fn pong_carries_session_key_and_id() {
        let request = GatewayRequest::new(Verb::Pong).field("ID", "TC");

        assert_eq!(
            request.to_value(Some("777d")),
            json!({"Request": "PONG", "SessionKey": "777d", "ID": "TC"})
        );
    }

    #[test]
    fn missing_session_key_is_null() {
        let value = GatewayRequest::new(Verb::Logout).to_value(None);
        assert_eq!(value, json!({"Request": "LOGOUT", "SessionKey": null}));
    }

    #[test_case(json!({"Reply": "SUBQUOTE", "Success": "OK"}); "accepted")]
    #[test_case(json!({"Reply": "SUBQUOTE"}); "no success field")]
    #[test_case(json!({"Reply": "SUBQUOTE", "Success": "FAIL"}); "rejected without reason")]
    fn passes_through(reply: Value) {
        assert!(classify_reply(Verb::SubQuote, &reply).is_ok());
    }

    #[test]
    fn session_illegal_wins_over_verb() {
        let reply = json!({"Success": "Fail", "ErrMsg": "Error: the Session is illegal"});
        let err = classify_reply(Verb::SubQuote, &reply).unwrap_err();
        assert!(err.is_session_illegal());
    }

    #[test_case(Verb::SubQuote)]
    #[test_case(Verb::UnsubQuote)]
    fn subscription_rejects(verb: Verb) {
        let reply = json!({"Success": "Fail", "ErrMsg": "symbol not found"});
        assert!(matches!(
            classify_reply(verb, &reply),
            Err(GatewayError::SubscribeFailure(msg)) if msg == "symbol not found"
        ));
    }

    #[test]
    fn new_order_known_code() {
        let reply = json!({"Reply": "NEWORDER", "Success": "Fail", "ErrCode": "-10"});
        match classify_reply(Verb::NewOrder, &reply) {
            Err(GatewayError::NewOrderFailure { code, reason }) => {
                assert_eq!(code, "-10");
                assert_eq!(reason, "Unknown Error");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn new_order_unmapped_code() {
        let reply = json!({"Reply": "NEWORDER", "Success": "Fail", "ErrCode": -99, "ErrMsg": "?"});
        assert!(matches!(
            classify_reply(Verb::NewOrder, &reply),
            Err(GatewayError::UnknownOrderError { code }) if code == "-99"
        ));
    }

    #[test]
    fn err_code_outside_new_order_is_generic() {
        let reply = json!({"Success": "Fail", "ErrCode": "-10", "ErrMsg": "bad account"});
        assert!(matches!(
            classify_reply(Verb::CancelOrder, &reply),
            Err(GatewayError::Gateway(msg)) if msg == "bad account"
        ));
    }

    #[test]
    fn generic_rejection() {
        let reply = json!({"Reply": "QUERYINSTRUMENTINFO", "Success": "Fail", "ErrMsg": "no such symbol"});
        assert!(matches!(
            classify_reply(Verb::QueryInstrumentInfo, &reply),
            Err(GatewayError::Gateway(_))
        ));
    }
}
