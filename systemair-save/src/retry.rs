use std::future::Future;

use tracing::warn;

use crate::{Error, Result};

/// What the SAVE Connect module answers with while its Modbus link to the unit is down.
pub const DISCONNECTED: &str = "MB DISCONNECTED";

/// Plain text acknowledgement of a write.
pub const ACKNOWLEDGED: &str = "OK";

pub fn is_disconnected(body: &str) -> bool {
    body.contains(DISCONNECTED)
}

pub fn is_acknowledgement(body: &str) -> bool {
    body.contains(ACKNOWLEDGED)
}

/// Calls `send` at most `attempts` times until it produces a body for which `should_retry` is false.
///
/// Communication errors (timeouts, refused connections) are retried too. Any other error is returned immediately.
/// When the last attempt still yields a body matching `should_retry`, this fails with [`Error::Disconnected`].
pub async fn retry_while<F, Fut, P>(attempts: u32, mut send: F, should_retry: P) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
    P: Fn(&str) -> bool,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let last = attempt >= attempts;
        match send().await {
            Ok(body) if should_retry(&body) => {
                if last {
                    return Err(Error::Disconnected { attempts });
                }
                warn!(attempt, %body, "Received transient response, retrying...");
            }
            Err(error) if error.is_communication() && !last => {
                warn!(attempt, %error, "Request failed, retrying...");
            }
            result => return result,
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::future::ready;

    fn replies(bodies: &[&str]) -> VecDeque<Result<String>> {
        bodies.iter().map(|b| Ok(b.to_string())).collect()
    }

    #[tokio::test]
    async fn disconnected_once_then_success() {
        let mut replies = replies(&["MB DISCONNECTED", r#"{"2000":215}"#]);
        let body = retry_while(2, || ready(replies.pop_front().unwrap()), is_disconnected)
            .await
            .unwrap();
        assert_eq!(body, r#"{"2000":215}"#);
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn disconnected_until_budget_is_exhausted() {
        let mut replies = replies(&["MB DISCONNECTED", "MB DISCONNECTED", "OK"]);
        let result = retry_while(2, || ready(replies.pop_front().unwrap()), is_disconnected).await;
        assert!(matches!(result, Err(Error::Disconnected { attempts: 2 })));
        assert!(result.unwrap_err().is_communication());
        // the third reply is never requested
        assert_eq!(replies.len(), 1);
    }

    #[tokio::test]
    async fn structural_errors_are_not_retried() {
        let mut replies: VecDeque<Result<String>> = VecDeque::from([
            Err(Error::UnexpectedResponse("garbage".into())),
            Ok("OK".into()),
        ]);
        let result = retry_while(2, || ready(replies.pop_front().unwrap()), is_disconnected).await;
        assert!(matches!(result, Err(Error::UnexpectedResponse(_))));
        assert_eq!(replies.len(), 1);
    }

    #[tokio::test]
    async fn a_budget_of_zero_still_sends_once() {
        let mut calls = 0;
        let body = retry_while(
            0,
            || {
                calls += 1;
                ready(Ok("OK".to_owned()))
            },
            is_disconnected,
        )
        .await
        .unwrap();
        assert_eq!(body, "OK");
        assert_eq!(calls, 1);
    }

    #[test]
    fn body_predicates() {
        assert!(is_disconnected("ERROR: MB DISCONNECTED\r\n"));
        assert!(!is_disconnected(r#"{"2000":215}"#));
        assert!(is_acknowledgement("OK"));
        assert!(!is_acknowledgement(r#"{"2000":215}"#));
    }
}
