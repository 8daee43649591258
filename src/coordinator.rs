//! Single coordination thread
//!
//! All surface state lives in one [`SurfaceManager`] owned by the
//! [`Coordinator`]. Everything that needs to touch it from elsewhere (timer
//! ticks, capture completions, deferred resizes, popup cancellation) posts a
//! task through a [`TaskRunner`]. Tasks run one at a time, in posting order,
//! with delayed tasks ordered by deadline.

use crate::backend::{FrameSinkIdAllocator, SequentialFrameSinkIds};
use crate::config::PacingConfig;
use crate::surface::SurfaceManager;
use log::{debug, trace};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Work executed on the coordination thread
pub type Task = Box<dyn FnOnce(&mut SurfaceManager) + Send>;

enum Message {
    Run(Task),
    RunAt(Instant, Task),
}

/// Posts tasks to the coordination thread. Cheap to clone and usable from
/// any thread.
#[derive(Clone)]
pub struct TaskRunner {
    tx: mpsc::UnboundedSender<Message>,
}

impl TaskRunner {
    /// Queues `task`. Returns `false` if the coordinator is gone.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut SurfaceManager) + Send + 'static,
    {
        self.tx.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Queues `task` to run once `delay` has elapsed
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce(&mut SurfaceManager) + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        self.tx
            .send(Message::RunAt(deadline, Box::new(task)))
            .is_ok()
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

struct DelayedTask {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum Wake {
    Shutdown,
    Message(Option<Message>),
    Timer,
}

/// Owner of the surface arena and its task queue
pub struct Coordinator {
    manager: SurfaceManager,
    rx: mpsc::UnboundedReceiver<Message>,
    delayed: BinaryHeap<DelayedTask>,
    next_seq: u64,
}

impl Coordinator {
    /// Creates a coordinator with a sequential frame sink id allocator
    pub fn new(pacing: PacingConfig) -> Self {
        Self::with_frame_sink_ids(pacing, Arc::new(SequentialFrameSinkIds::default()))
    }

    pub fn with_frame_sink_ids(
        pacing: PacingConfig,
        frame_sink_ids: Arc<dyn FrameSinkIdAllocator>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = TaskRunner { tx };
        Self {
            manager: SurfaceManager::new(runner, pacing, frame_sink_ids),
            rx,
            delayed: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn runner(&self) -> TaskRunner {
        self.manager.runner().clone()
    }

    pub fn manager(&self) -> &SurfaceManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SurfaceManager {
        &mut self.manager
    }

    /// Number of delayed tasks not yet due
    pub fn pending_delayed(&self) -> usize {
        self.delayed.len()
    }

    /// Runs every queued task and every delayed task that is due, including
    /// tasks posted by the tasks themselves. Returns how many ran.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        loop {
            let mut progressed = false;
            while let Ok(message) = self.rx.try_recv() {
                if self.dispatch(message) {
                    ran += 1;
                }
                progressed = true;
            }
            if self.run_due_tasks(Instant::now()) > 0 {
                ran += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        if ran > 0 {
            trace!("Coordinator ran {} task batch(es)", ran);
        }
        ran
    }

    /// Processes tasks as they arrive until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        debug!("Coordinator loop started");

        loop {
            let next_deadline = self.delayed.peek().map(|task| task.deadline);
            let wake = tokio::select! {
                _ = &mut shutdown => Wake::Shutdown,
                message = self.rx.recv() => Wake::Message(message),
                _ = sleep_until_deadline(next_deadline) => Wake::Timer,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Message(Some(message)) => {
                    self.dispatch(message);
                }
                // The manager holds a sender, so the channel never closes
                // while the loop runs.
                Wake::Message(None) => break,
                Wake::Timer => {
                    self.run_due_tasks(Instant::now());
                }
            }
        }

        debug!("Coordinator loop stopped");
    }

    /// Returns whether a task ran immediately
    fn dispatch(&mut self, message: Message) -> bool {
        match message {
            Message::Run(task) => {
                task(&mut self.manager);
                true
            }
            Message::RunAt(deadline, task) => {
                self.next_seq += 1;
                self.delayed.push(DelayedTask {
                    deadline,
                    seq: self.next_seq,
                    task,
                });
                false
            }
        }
    }

    fn run_due_tasks(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        while self.delayed.peek().is_some_and(|task| task.deadline <= now) {
            if let Some(delayed) = self.delayed.pop() {
                (delayed.task)(&mut self.manager);
                ran += 1;
            }
        }
        ran
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
