//! Parallel join with specification-order failure propagation
//!
//! Branches run concurrently. Results come back in the order the branches
//! were given. The reported failure is the one of the earliest failing branch
//! in that order: the failure of branch `i` is returned as soon as every
//! branch before `i` has succeeded, without waiting for branches after `i`.
//! The outcome therefore never depends on completion timing.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

type Indexed<'a, T, E> = BoxFuture<'a, (usize, Result<T, E>)>;

/// Branches still running when a join failed
pub struct Stragglers<'a, T, E> {
    pending: FuturesUnordered<Indexed<'a, T, E>>,
}

impl<'a, T, E> Stragglers<'a, T, E> {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every remaining branch; results are returned in completion order
    pub async fn drain(mut self) -> Vec<(usize, Result<T, E>)> {
        let mut finished = Vec::with_capacity(self.pending.len());
        while let Some(result) = self.pending.next().await {
            finished.push(result);
        }
        finished
    }
}

/// A join that failed at branch `index`
pub struct JoinFailure<'a, T, E> {
    pub index: usize,
    pub error: E,
    pub stragglers: Stragglers<'a, T, E>,
}

/// Run every branch concurrently and join them
pub async fn join_all<'a, T, E>(
    branches: Vec<BoxFuture<'a, Result<T, E>>>,
) -> Result<Vec<T>, JoinFailure<'a, T, E>>
where
    T: Send + 'a,
    E: Send + 'a,
{
    let total = branches.len();
    let mut pending: FuturesUnordered<Indexed<'a, T, E>> = branches
        .into_iter()
        .enumerate()
        .map(|(index, branch)| -> Indexed<'a, T, E> {
            Box::pin(async move { (index, branch.await) })
        })
        .collect();

    let mut outputs: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut failures: BTreeMap<usize, E> = BTreeMap::new();

    while let Some((index, result)) = pending.next().await {
        match result {
            Ok(value) => outputs[index] = Some(value),
            Err(error) => {
                failures.insert(index, error);
            }
        }

        let prefix_settled = failures
            .keys()
            .next()
            .is_some_and(|&first| outputs[..first].iter().all(Option::is_some));
        if prefix_settled {
            if let Some((index, error)) = failures.pop_first() {
                return Err(JoinFailure {
                    index,
                    error,
                    stragglers: Stragglers { pending },
                });
            }
        }
    }

    Ok(outputs.into_iter().flatten().collect())
}
