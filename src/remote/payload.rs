use serde_json::Value;

/// Structured request or response body of a remote call.
pub type Payload = Value;

// Members a backend uses to flag an application-level failure inside an
// otherwise successful response.
const ERROR_MEMBERS: [&str; 2] = ["error", "errorMessage"];

/// Returns the application error carried by `payload`, if any.
///
/// A member counts as an error marker when it is present and is neither
/// `null`, `false` nor an empty string.
pub fn application_error(payload: &Payload) -> Option<String> {
    let object = payload.as_object()?;

    ERROR_MEMBERS.iter().find_map(|key| match object.get(*key)? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(inner) => Some(
            inner
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(inner.clone()).to_string()),
        ),
        other => Some(other.to_string()),
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
