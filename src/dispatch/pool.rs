use std::sync::atomic::{AtomicBool, Ordering};

use super::{Dispatcher, Task};

/// A dispatcher that executes processes over `workers + 1` threads: the
/// worker threads of a persistent [`rayon::ThreadPool`] plus the thread
/// calling [`execute`](Dispatcher::execute).
///
/// Every `execute` call enters a cooperative claim loop: each participant
/// atomically claims an unclaimed task, runs it, marks it done, and keeps
/// scanning until every task is done. The scope join returns the workers
/// to the pool idle.
///
/// Note that with very small worlds and short processes the claim and
/// wake-up overhead can outweigh the parallelism.
pub struct Pool {
    pool:    rayon::ThreadPool,
    workers: usize,
    time:    f64,
    tasks:   Vec<Scheduled>,
}

struct Scheduled {
    task:  Task,
    taken: AtomicBool,
    done:  AtomicBool,
}

impl Pool {
    /// Builds a pool dispatcher with `workers` worker threads.
    ///
    /// The calling thread participates in execution as well, so `workers`
    /// may be small; it must be at least 1 and stays below 32.
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "a pool dispatcher needs at least one worker thread");
        assert!(workers < 32, "more than 32 dispatch workers is never a win");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tandem dispatcher #{i}"))
            .build()
            .expect("failed to create dispatcher thread pool");
        Self { pool, workers, time: 0.0, tasks: Vec::new() }
    }
}

impl Dispatcher for Pool {
    fn set_time(&mut self, time: f64) { self.time = time; }

    fn schedule(&mut self, task: Task) {
        self.tasks.push(Scheduled {
            task,
            taken: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });
    }

    fn execute(&mut self) {
        let time = self.time;
        let tasks = &self.tasks[..];

        self.pool.in_place_scope(|scope| {
            for _ in 0..self.workers {
                scope.spawn(move |_| claim_loop(tasks, time));
            }
            claim_loop(tasks, time);
        });

        debug_assert!(self.tasks.iter().all(|s| s.done.load(Ordering::SeqCst)));
        self.tasks.clear();
    }
}

fn claim_loop(tasks: &[Scheduled], time: f64) {
    loop {
        let mut all_done = true;

        for scheduled in tasks {
            if scheduled
                .taken
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                scheduled.task.run(time);
                scheduled.done.store(true, Ordering::SeqCst);
            } else if !scheduled.done.load(Ordering::SeqCst) {
                all_done = false;
            }
        }

        if all_done {
            return;
        }
        std::thread::yield_now();
    }
}
