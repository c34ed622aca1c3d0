use cuckoo_table::{CuckooSet, WorkerPool, MAX_LOOKUP_BATCH};
use std::sync::{mpsc, Arc};
use test_log::test;

#[test]
fn pool_dispatches_batched_lookups() -> cuckoo_table::Result<()> {
    // build first, then query: the table is immutable while the pool runs
    let mut set = CuckooSet::with_capacity(1_024)?;
    for key in 0..800 {
        set.insert(key)?;
    }
    let table = Arc::new(set);

    let pool = WorkerPool::new(2);
    let (results_in, results_out) = mpsc::channel();

    // round-robin one window per job; every worker owns its own result slab
    for (window_id, start) in (0..800u64).step_by(MAX_LOOKUP_BATCH).enumerate() {
        let worker = window_id % pool.worker_count();
        let table = Arc::clone(&table);
        let results_in = results_in.clone();

        pool.queue(worker, move || {
            let keys = (start..start + MAX_LOOKUP_BATCH as u64).collect::<Vec<_>>();
            let mut results = [None; MAX_LOOKUP_BATCH];

            table.find_batched(&keys, &mut results);

            results_in
                .send((keys, results))
                .expect("collector should be alive");
        });
    }
    drop(results_in);

    pool.drain(0);
    pool.drain(1);

    let mut windows = 0;
    for (keys, results) in results_out {
        for (i, &key) in keys.iter().enumerate() {
            assert_eq!(table.find(key), results[i], "key {key}");
            assert!(results[i].is_some());
        }
        windows += 1;
    }
    assert_eq!(100, windows);

    pool.shutdown();

    Ok(())
}

#[test]
fn shared_table_serves_concurrent_readers() -> cuckoo_table::Result<()> {
    let mut set = CuckooSet::with_capacity(4_096)?;
    for key in 0..3_000 {
        set.insert(key)?;
    }

    std::thread::scope(|scope| {
        let table = &set;

        for reader in 0..4u64 {
            scope.spawn(move || {
                for key in (reader * 750)..((reader + 1) * 750) {
                    assert!(table.find(key).is_some());
                }
                for key in 3_000..3_100 {
                    assert!(table.find(key).is_none());
                }
            });
        }
    });

    Ok(())
}
