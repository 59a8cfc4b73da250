//! Middleware for logging requests with password fields redacted.

use axum::{
    body::Body,
    extract::Request,
    http::{StatusCode, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Log each request and its response status.
///
/// JSON request bodies are logged at the `debug` level with every
/// `*password*` field's value replaced by asterisks, so credentials never
/// reach the logs.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|content_type| content_type.to_str().ok())
        .is_some_and(|content_type| content_type.contains("application/json"));

    let request = if is_json && tracing::enabled!(tracing::Level::DEBUG) {
        let (parts, body) = request.into_parts();

        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::error!("could not buffer request body: {error}");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        tracing::debug!(
            "{method} {uri} body: {}",
            redact_passwords(&String::from_utf8_lossy(&bytes))
        );

        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    tracing::info!("received {method} {uri}");

    let response = next.run(request).await;

    tracing::info!("{method} {uri} responded {}", response.status());

    response
}

/// Replace the value of every JSON field whose key ends in `password` with
/// asterisks.
fn redact_passwords(text: &str) -> String {
    const KEY: &str = "password\"";

    let mut redacted = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(position) = rest.find(KEY) {
        let key_end = position + KEY.len();
        redacted.push_str(&rest[..key_end]);
        rest = &rest[key_end..];

        if let Some((prefix, remainder)) = split_quoted_value(rest) {
            redacted.push_str(prefix);
            redacted.push_str("********\"");
            rest = remainder;
        }
    }

    redacted.push_str(rest);
    redacted
}

/// Split a `: "value"` suffix into the text up to and including the opening
/// quote, and the text after the closing quote.
fn split_quoted_value(text: &str) -> Option<(&str, &str)> {
    let colon = text.find(':')?;

    if !text[..colon].trim().is_empty() {
        return None;
    }

    let after_colon = &text[colon + 1..];
    let open = after_colon.find('"')?;

    if !after_colon[..open].trim().is_empty() {
        return None;
    }

    let value_start = colon + 1 + open + 1;
    let close = closing_quote(&text[value_start..])?;

    Some((&text[..value_start], &text[value_start + close + 1..]))
}

/// The byte offset of the next quote that is not escaped.
fn closing_quote(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 2,
            b'"' => return Some(index),
            _ => index += 1,
        }
    }

    None
}

#[cfg(test)]
mod redact_passwords_tests {
    use super::redact_passwords;

    #[test]
    fn password_values_are_masked() {
        let body = r#"{"username": "alice", "password": "hunter2"}"#;

        assert_eq!(
            redact_passwords(body),
            r#"{"username": "alice", "password": "********"}"#
        );
    }

    #[test]
    fn old_and_new_password_fields_are_masked() {
        let body = r#"{"old_password": "hunter2", "new_password": "hunter3"}"#;

        assert_eq!(
            redact_passwords(body),
            r#"{"old_password": "********", "new_password": "********"}"#
        );
    }

    #[test]
    fn other_fields_are_left_alone() {
        let body = r#"{"name": "Groceries"}"#;

        assert_eq!(redact_passwords(body), body);
    }

    #[test]
    fn escaped_quotes_in_passwords_stay_inside_the_mask() {
        let body = r#"{"password": "hun\"ter2", "username": "alice"}"#;

        assert_eq!(
            redact_passwords(body),
            r#"{"password": "********", "username": "alice"}"#
        );
    }
}
