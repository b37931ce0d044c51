// Poll loop for one search token: wait, fetch, classify, retry

use tokio_util::sync::CancellationToken;

use crate::{
    api::{ApiError, ClientConfig, SearchApi},
    error::SearchError,
    stats::SearchStats,
    types::{PriceMap, SearchToken},
    wait::{fallback_instant, wait_until, WaitOutcome},
};

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Prices(PriceMap),
    Cancelled,
}

/// Polls `token` until prices arrive, the retry budget runs out, or `cancel` fires.
///
/// "Too early" answers only move the next wait instant. Every other failure
/// counts against `config.retry.max_retries`; one more than that is fatal.
/// Cancellation is checked before each wait and races the wait itself, but an
/// in-flight poll is always allowed to finish.
pub async fn poll_prices(
    api: &dyn SearchApi,
    token: &SearchToken,
    initial_wait: Option<String>,
    cancel: &CancellationToken,
    config: &ClientConfig,
    stats: &SearchStats,
) -> Result<PollOutcome, SearchError> {
    let mut attempts: u32 = 0;
    let mut next_wait = initial_wait;

    loop {
        if cancel.is_cancelled() {
            tracing::debug!(%token, "poll loop cancelled before wait");
            return Ok(PollOutcome::Cancelled);
        }

        if let Some(instant) = next_wait.take() {
            if wait_until(Some(&instant), cancel).await == WaitOutcome::Cancelled {
                tracing::debug!(%token, "poll loop cancelled during wait");
                return Ok(PollOutcome::Cancelled);
            }
        }

        SearchStats::incr(&stats.polls_sent);
        tracing::debug!(%token, attempts, "polling search results");

        match api.poll(token).await {
            Ok(prices) => {
                tracing::debug!(%token, count = prices.len(), "search results ready");
                return Ok(PollOutcome::Prices(prices));
            }
            Err(ApiError::Cancelled) => return Ok(PollOutcome::Cancelled),
            Err(err @ ApiError::Http { .. }) if err.is_too_early() => {
                SearchStats::incr(&stats.polls_too_early);
                // a 425 without a hint would otherwise turn into a tight loop
                next_wait = Some(
                    err.retry_after()
                        .map(str::to_string)
                        .unwrap_or_else(|| fallback_instant(config.retry.fallback_delay())),
                );
            }
            Err(err @ (ApiError::Network(_) | ApiError::Http { .. })) => {
                attempts += 1;
                if attempts > config.retry.max_retries {
                    tracing::warn!(%token, attempts, error = %err, "giving up on search");
                    return Err(SearchError::fatal(&err, attempts, &config.messages));
                }

                SearchStats::incr(&stats.polls_retried);
                tracing::warn!(%token, attempts, error = %err, "poll failed, retrying");
                next_wait = Some(
                    err.retry_after()
                        .map(str::to_string)
                        .unwrap_or_else(|| fallback_instant(config.retry.fallback_delay())),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock_server::{in_ms, price, prices, MockSearchApi},
        types::ApiErrorPayload,
    };
    use std::{sync::atomic::Ordering, time::Duration};
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn server_error(message: Option<&str>) -> ApiError {
        ApiError::http(
            500,
            ApiErrorPayload {
                message: message.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_early_never_counts_as_failure() {
        let api = MockSearchApi::new();
        for _ in 0..6 {
            api.poll_too_early("abc", Some(in_ms(200)));
        }
        api.poll_prices("abc", prices([("p1", price(10.0, "USD", "1"))]));
        let stats = SearchStats::default();

        let outcome = poll_prices(
            &api,
            &SearchToken::from("abc"),
            None,
            &CancellationToken::new(),
            &ClientConfig::default(),
            &stats,
        )
        .await;

        let outcome = assert_ok!(outcome);
        assert!(matches!(outcome, PollOutcome::Prices(p) if p.len() == 1));
        assert_eq!(api.poll_count("abc"), 7);
        assert_eq!(stats.polls_too_early.load(Ordering::SeqCst), 6);
        assert_eq!(stats.polls_retried.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_after_three_polls() {
        let api = MockSearchApi::new();
        for _ in 0..5 {
            api.script_poll("abc", Err(server_error(Some("Supplier timeout"))));
        }
        let stats = SearchStats::default();
        let start = Instant::now();

        let outcome = poll_prices(
            &api,
            &SearchToken::from("abc"),
            None,
            &CancellationToken::new(),
            &ClientConfig::default(),
            &stats,
        )
        .await;

        let err = assert_err!(outcome);
        assert_eq!(
            err,
            SearchError::Fatal {
                message: "Supplier timeout".to_string(),
                attempts: 3
            }
        );
        assert_eq!(api.poll_count("abc"), 3);
        assert_eq!(stats.polls_retried.load(Ordering::SeqCst), 2);
        // two fallback waits of one second between the three polls
        assert!(start.elapsed() >= Duration::from_millis(1_900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failures_share_budget_with_http_failures() {
        let api = MockSearchApi::new();
        api.script_poll("abc", Err(server_error(None)));
        api.script_poll("abc", Err(ApiError::Network("reset".to_string())));
        api.script_poll("abc", Err(ApiError::Network("reset".to_string())));
        let config = ClientConfig::default();

        let err = poll_prices(
            &api,
            &SearchToken::from("abc"),
            None,
            &CancellationToken::new(),
            &config,
            &SearchStats::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.user_message(), config.messages.network_failed);
        assert_eq!(api.poll_count("abc"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_budget() {
        let api = MockSearchApi::new();
        api.script_poll("abc", Err(server_error(None)));
        api.poll_too_early("abc", Some(in_ms(300)));
        api.script_poll("abc", Err(ApiError::Network("reset".to_string())));
        api.poll_prices("abc", prices([("p1", price(1.0, "EUR", "9"))]));

        let outcome = poll_prices(
            &api,
            &SearchToken::from("abc"),
            Some(in_ms(100)),
            &CancellationToken::new(),
            &ClientConfig::default(),
            &SearchStats::default(),
        )
        .await;

        assert!(matches!(assert_ok!(outcome), PollOutcome::Prices(_)));
        assert_eq!(api.poll_count("abc"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_retry_hint_is_honoured() {
        let api = MockSearchApi::new();
        api.script_poll(
            "abc",
            Err(ApiError::http(
                503,
                ApiErrorPayload {
                    wait_until: Some(in_ms(5_000)),
                    ..Default::default()
                },
            )),
        );
        let start = Instant::now();

        let outcome = poll_prices(
            &api,
            &SearchToken::from("abc"),
            None,
            &CancellationToken::new(),
            &ClientConfig::default(),
            &SearchStats::default(),
        )
        .await;

        assert_ok!(outcome);
        assert!(start.elapsed() >= Duration::from_millis(4_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_poll_makes_no_call() {
        let api = MockSearchApi::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poll_prices(
            &api,
            &SearchToken::from("abc"),
            Some(in_ms(1_000)),
            &cancel,
            &ClientConfig::default(),
            &SearchStats::default(),
        )
        .await;

        assert_eq!(assert_ok!(outcome), PollOutcome::Cancelled);
        assert_eq!(api.poll_count("abc"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_too_early_wait() {
        let api = MockSearchApi::new();
        api.poll_too_early("abc", Some(in_ms(60_000)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = poll_prices(
            &api,
            &SearchToken::from("abc"),
            None,
            &cancel,
            &ClientConfig::default(),
            &SearchStats::default(),
        )
        .await;

        assert_eq!(assert_ok!(outcome), PollOutcome::Cancelled);
        assert_eq!(api.poll_count("abc"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_interrupt_in_flight_poll() {
        let api = MockSearchApi::new();
        api.poll_prices("abc", prices([("p1", price(5.0, "USD", "1"))]));
        api.set_delay(500);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = poll_prices(
            &api,
            &SearchToken::from("abc"),
            None,
            &cancel,
            &ClientConfig::default(),
            &SearchStats::default(),
        )
        .await;

        // the caller, not the loop, decides whether a late result is kept
        assert!(matches!(assert_ok!(outcome), PollOutcome::Prices(_)));
    }
}
