use super::{Dispatcher, Task};

/// The single-threaded dispatcher: runs every process synchronously on the
/// calling thread, in scheduling order.
#[derive(Default)]
pub struct Serial {
    time: f64,
}

impl Serial {
    /// Creates a serial dispatcher.
    pub fn new() -> Self { Self::default() }
}

impl Dispatcher for Serial {
    fn set_time(&mut self, time: f64) { self.time = time; }

    fn schedule(&mut self, task: Task) { task.run(self.time); }

    fn execute(&mut self) {}
}
