//! Greeting composition.

use chrono::Utc;
use hail_wire::GreetingResponse;

/// Composes one greeting for `name` at the current instant. Pure text
/// composition aside from the timestamp capture; this cannot fail.
pub(crate) fn greet(name: &str) -> GreetingResponse {
    let now = Utc::now();
    GreetingResponse {
        message: format!("Hello, {name} @ {now}"),
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_name_and_timestamp() {
        let response = greet("alice");
        assert!(response.message.starts_with("Hello, alice @ "));
        assert!(response.message.contains(&response.generated_at.to_string()));
    }
}
