//! New-order reject codes returned in `ErrCode` of a failed NEWORDER.

use serde_json::Value;

/// Human-readable reason for a reject code, if the code is known.
#[must_use]
pub fn reject_reason(code: &str) -> Option<&'static str> {
    let reason = match code {
        "-10" => "Unknown Error",
        "-11" => "invalid order side",
        "-13" => "account cannot trade products of this exchange",
        "-14" => "unsupported price, order type or time in force",
        "-15" => "securities orders are not supported",
        "-20" => "connection not established",
        "-22" => "price does not match tick size",
        "-23" => "order quantity exceeds limit",
        "-24" => "invalid order quantity",
        "-25" => "price must be greater than zero (market orders excepted)",
        _ => return None,
    };
    Some(reason)
}

/// Normalize an `ErrCode` field to its string form.
///
/// The gateway sends codes as strings, but numbers are accepted too.
#[must_use]
pub fn err_code(value: &Value) -> Option<String> {
    match value {
        Value::String(code) => Some(code.trim().to_string()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}
