//! Fan-out/fan-in "chord" primitive (§4.3, §9's `TaskDispatcher` pattern).
//!
//! A chord is `(group, callback)`: every task in `group` runs to completion
//! (success or exhausted retry) before `callback` fires exactly once with the
//! full result list, in task order. The callback always runs, even when
//! every group member fails — failures travel as `Err` entries in the result
//! list rather than aborting the chord (§8 property 4's "callback has run
//! exactly once with a result list of the same cardinality as the group").
//!
//! Same `Semaphore`-bounded concurrency and `watch`-channel fail-fast flag as
//! a role-parallel task executor, keyed over an arbitrary item type rather
//! than a fixed role enum, with task results fixed to `Result<T, String>` so
//! fail-fast can actually detect a failing sibling (a fully generic `O`
//! cannot be inspected here).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::warn;

/// Concurrency and fail-fast knobs for one chord group.
#[derive(Debug, Clone, Copy)]
pub struct ChordConfig {
    pub max_concurrent: usize,
    pub fail_fast: bool,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            fail_fast: false,
        }
    }
}

/// Runs `task` over every item in `group`, bounded by `config.max_concurrent`,
/// and returns the results in the same order as `group`. A task skipped
/// because a sibling already tripped `fail_fast` is reported as a
/// `"skipped: fail_fast triggered by a sibling task"` error.
pub async fn run_group<I, T, F, Fut>(group: Vec<I>, config: ChordConfig, task: F) -> Vec<Result<T, String>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
{
    let task = Arc::new(task);
    let sem = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let (fail_tx, _fail_rx) = tokio::sync::watch::channel(false);
    let fail_flag = Arc::new(fail_tx);
    let slots: Arc<Mutex<Vec<Option<Result<T, String>>>>> =
        Arc::new(Mutex::new((0..group.len()).map(|_| None).collect()));

    let mut handles = Vec::with_capacity(group.len());
    for (index, item) in group.into_iter().enumerate() {
        let task = Arc::clone(&task);
        let sem = Arc::clone(&sem);
        let fail_flag = Arc::clone(&fail_flag);
        let fail_rx = fail_flag.subscribe();
        let slots = Arc::clone(&slots);
        let fail_fast = config.fail_fast;

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            if *fail_rx.borrow() {
                slots.lock().await[index] =
                    Some(Err("skipped: fail_fast triggered by a sibling task".to_string()));
                return;
            }

            let outcome = task(item).await;
            if outcome.is_err() {
                warn!(index, "chord group task failed");
                if fail_fast {
                    let _ = fail_flag.send(true);
                }
            }
            slots.lock().await[index] = Some(outcome);
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "chord group task panicked");
        }
    }

    Arc::try_unwrap(slots)
        .unwrap_or_else(|_| panic!("chord group slots still shared after every task joined"))
        .into_inner()
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err("task never completed".to_string())))
        .collect()
}

/// `chord(group, callback)`: runs `task` over `group` then `callback` once
/// with the full ordered result list (§4.3's chord contract).
pub async fn chord<I, T, F, Fut, C, R>(group: Vec<I>, config: ChordConfig, task: F, callback: C) -> R
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
    C: FnOnce(Vec<Result<T, String>>) -> R,
{
    let results = run_group(group, config, task).await;
    callback(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn callback_runs_once_with_full_cardinality_even_on_partial_failure() {
        let items = vec![1, 2, 3, 4];
        let results = chord(
            items,
            ChordConfig::default(),
            |n: i32| async move {
                if n % 2 == 0 {
                    Err(format!("bad item {n}"))
                } else {
                    Ok(n * 10)
                }
            },
            |results| results,
        )
        .await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0], Ok(10));
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn empty_group_still_invokes_callback() {
        let results = chord(
            Vec::<i32>::new(),
            ChordConfig::default(),
            |n: i32| async move { Ok(n) },
            |results| results.len(),
        )
        .await;
        assert_eq!(results, 0);
    }

    #[tokio::test]
    async fn fail_fast_short_circuits_unstarted_siblings() {
        let items: Vec<i32> = (0..20).collect();
        let results = chord(
            items,
            ChordConfig {
                max_concurrent: 1,
                fail_fast: true,
            },
            |n: i32| async move {
                if n == 0 {
                    Err("boom".to_string())
                } else {
                    Ok(n)
                }
            },
            |results| results,
        )
        .await;

        assert!(results[0].is_err());
        assert!(results.iter().skip(1).any(|r| r.is_err()));
    }
}
