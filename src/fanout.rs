//! "Run everything, keep what worked" fan-out.

use std::future::Future;

use futures_util::future::join_all;

/// Outcomes of a batch of independent operations, split by result.
#[derive(Debug)]
pub struct Settled<T, E> {
    pub succeeded: Vec<T>,
    pub failed: Vec<E>,
}

impl<T, E> Settled<T, E> {
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = Result<T, E>>,
    {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(value) => succeeded.push(value),
                Err(err) => failed.push(err),
            }
        }
        Self { succeeded, failed }
    }
}

/// Drive all futures concurrently and wait until every one has settled. A
/// failure never cancels its siblings.
pub async fn settle_all<I, F, T, E>(futures: I) -> Settled<T, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    Settled::from_outcomes(join_all(futures).await)
}
