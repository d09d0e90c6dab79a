extern crate core_affinity;
extern crate env_logger;
#[macro_use]
extern crate log;
extern crate rs_elimination;

use rs_elimination::config::StackConfig;
use rs_elimination::elimination_backoff_stack::EliminationBackoffStack;
use rs_elimination::lockfree_stack::LockFreeStack;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const LOOP_CNT: u64 = 200_000;

fn set_cpu_affinity(idx: usize) {
    if let Some(cpus) = core_affinity::get_core_ids() {
        if !cpus.is_empty() {
            core_affinity::set_for_current(cpus[idx % cpus.len()]);
        }
    }
}

/// Every thread runs `LOOP_CNT` push/pop pairs on `op`, returns the cost in ms.
fn run_pairs<F>(thread_count: usize, op: F) -> u128
where
    F: Fn(u64) + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let barrier = Arc::new(Barrier::new(thread_count + 1));
    let threads: Vec<_> = (0..thread_count)
        .map(|t| {
            let op = op.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                set_cpu_affinity(t);
                barrier.wait();
                for i in 0..LOOP_CNT {
                    op((t as u64) << 32 | i);
                }
            })
        })
        .collect();
    barrier.wait();
    let start = Instant::now();
    for t in threads {
        t.join().unwrap();
    }
    start.elapsed().as_millis()
}

fn main() {
    env_logger::init();

    let thread_count = core_affinity::get_core_ids()
        .map(|cpus| cpus.len())
        .unwrap_or(4)
        .max(2);
    info!("thread_count {}, loop_cnt {}", thread_count, LOOP_CNT);

    let treiber = Arc::new(LockFreeStack::default());
    let cost = {
        let treiber = treiber.clone();
        run_pairs(thread_count, move |v| {
            treiber.push(v);
            treiber.pop().unwrap();
        })
    };
    info!("lock-free stack cost {} ms", cost);
    assert!(treiber.is_empty());

    let config = StackConfig::new(thread_count.max(2) / 2, Duration::from_micros(100));
    let elimination = Arc::new(EliminationBackoffStack::new(config).unwrap());
    let cost = {
        let elimination = elimination.clone();
        run_pairs(thread_count, move |v| {
            elimination.push(v);
            elimination.pop().unwrap();
        })
    };
    info!("elimination backoff stack cost {} ms", cost);
    assert!(elimination.is_empty());

    let stats = elimination.stats();
    info!(
        "stack pushes {}, stack pops {}, eliminated pairs {}, exchange timeouts {}, cas failures {}",
        stats.stack_pushes,
        stats.stack_pops,
        stats.eliminated_pops,
        stats.exchange_timeouts,
        stats.cas_failures
    );
}
