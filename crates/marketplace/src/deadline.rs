//! Deadline applied to every store and identity provider call.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::MarketError;

/// Run `fut` with a deadline of `after`.
///
/// # Errors
///
/// Returns `MarketError::Timeout` if the deadline passes first, otherwise
/// whatever `fut` returns (converted into `MarketError`).
pub async fn within<T, E, F>(after: Duration, operation: &'static str, fut: F) -> Result<T, MarketError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<MarketError>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            warn!(operation, ?after, "operation timed out");
            Err(MarketError::Timeout { operation, after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let result: Result<(), MarketError> = within(
            Duration::from_secs(20),
            "read profile",
            std::future::pending::<Result<(), StoreError>>(),
        )
        .await;
        assert!(matches!(
            result,
            Err(MarketError::Timeout {
                operation: "read profile",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_passes_through_errors() {
        let result: Result<(), MarketError> = within(Duration::from_secs(1), "write", async {
            Err(StoreError::Unavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(MarketError::Store(_))));
    }
}
