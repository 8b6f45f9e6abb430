//! Fixed-size worker pool fed through a bounded channel.

use crossbeam_channel::{bounded, unbounded};
use log::debug;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `work` over every item with at most `workers` in flight. A panic
    /// inside `work` is handed to `on_panic` and the worker moves on.
    /// Results come back in input order.
    pub fn run<I, T, R, F, P>(&self, items: I, work: F, on_panic: P) -> Vec<R>
    where
        I: IntoIterator<Item = T>,
        T: Send,
        R: Send,
        F: Fn(usize, &T) -> R + Sync,
        P: Fn(usize, &T, String) -> R + Sync,
    {
        let (result_tx, result_rx) = unbounded::<(usize, R)>();

        thread::scope(|scope| {
            let (job_tx, job_rx) = bounded::<(usize, T)>(self.workers * 2);
            for worker in 0..self.workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let work = &work;
                let on_panic = &on_panic;
                scope.spawn(move || {
                    for (id, item) in job_rx.iter() {
                        let result = match catch_unwind(AssertUnwindSafe(|| work(id, &item))) {
                            Ok(result) => result,
                            Err(payload) => on_panic(id, &item, panic_message(payload.as_ref())),
                        };
                        if result_tx.send((id, result)).is_err() {
                            break;
                        }
                    }
                    debug!("Worker {} finished", worker);
                });
            }
            drop(job_rx);

            for (id, item) in items.into_iter().enumerate() {
                if job_tx.send((id, item)).is_err() {
                    break;
                }
            }
        });
        drop(result_tx);

        let mut results: Vec<(usize, R)> = result_rx.iter().collect();
        results.sort_by_key(|(id, _)| *id);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn results_keep_input_order() {
        let pool = WorkerPool::new(3);
        let out = pool.run(0..20u64, |_, n| n * 2, |_, _, _| u64::MAX);
        assert_eq!(out, (0..20u64).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn never_exceeds_worker_count() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let pool = WorkerPool::new(2);
        pool.run(
            0..12,
            |_, _| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                active.fetch_sub(1, Ordering::SeqCst);
            },
            |_, _, _| (),
        );
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn panics_become_results() {
        let pool = WorkerPool::new(2);
        let out = pool.run(
            vec!["ok", "boom", "ok"],
            |_, item| {
                if *item == "boom" {
                    panic!("exploded on {}", item);
                }
                Ok(item.to_string())
            },
            |id, _, msg| Err(format!("{}: {}", id, msg)),
        );
        assert_eq!(out[0], Ok("ok".to_string()));
        assert_eq!(out[1], Err("1: exploded on boom".to_string()));
        assert_eq!(out[2], Ok("ok".to_string()));
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
    }
}
