use futures::StreamExt;
use futures::stream;
use std::collections::BTreeMap;
use std::future::Future;

/// Run `work` for every item with at most `cap` futures in flight.
///
/// All futures are polled from the caller's task, so nothing is spawned and a
/// failing item cannot cancel its siblings. The result holds exactly one
/// entry per input key, ordered by key whatever order the work completed in.
/// Duplicate keys keep the last completed result.
pub async fn run_all<K, T, R, F, Fut>(items: Vec<(K, T)>, cap: usize, work: F) -> BTreeMap<K, R>
where
    K: Ord,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let work = &work;
    stream::iter(items)
        .map(|(key, item)| async move { (key, work(item).await) })
        .buffer_unordered(cap.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn results_are_keyed_and_ordered() {
        let items: Vec<(u32, u64)> = vec![(1, 30), (2, 1), (3, 15), (4, 5)];
        let results = run_all(items, 4, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay * 2
        })
        .await;

        assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(results[&1], 60);
        assert_eq!(results[&2], 2);
    }

    #[tokio::test]
    async fn never_exceeds_cap() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<(usize, usize)> = (0..12).map(|i| (i, i)).collect();

        let results = run_all(items, 3, |i| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i
            }
        })
        .await;

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn failures_do_not_drop_siblings() {
        let items: Vec<(u32, u32)> = (1..=5).map(|i| (i, i)).collect();
        let results = run_all(items, 2, |i| async move {
            if i % 2 == 0 { Err(format!("step {i} failed")) } else { Ok(i) }
        })
        .await;

        assert_eq!(results.len(), 5);
        assert_eq!(results[&1], Ok(1));
        assert_eq!(results[&2], Err("step 2 failed".to_string()));
        assert_eq!(results[&5], Ok(5));
    }

    #[tokio::test]
    async fn zero_cap_still_runs() {
        let results = run_all(vec![("a", 1), ("b", 2)], 0, |v| async move { v }).await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn empty_input() {
        let results: BTreeMap<u32, ()> = run_all(Vec::<(u32, ())>::new(), 4, |_| async {}).await;
        assert!(results.is_empty());
    }
}
