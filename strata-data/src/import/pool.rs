//! Fixed pool of import workers fed by a bounded queue.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Receiver, Sender};
use strata_core::Feature;

use super::{
    ImportError,
    control::{SessionControl, WorkGuard},
    error::describe,
    handle::{HandleError, ImportHandle, Outcome},
    helper::ImportHelper,
};

struct Job {
    feature: Feature,
    reply: Sender<Outcome>,
    guard: WorkGuard,
}

/// Finish request: flush when `commit` is set, close the helper, then exit.
struct Finish {
    commit: bool,
    reply: Sender<Result<(), Arc<ImportError>>>,
}

struct Worker {
    index: usize,
    control: Option<Sender<Finish>>,
    thread: Option<JoinHandle<()>>,
}

/// Worker threads, each owning one [`ImportHelper`].
pub(crate) struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<Worker>,
    session: Arc<SessionControl>,
}

impl WorkerPool {
    /// Start one named thread per helper.
    ///
    /// If a thread cannot be spawned the workers started so far are stopped
    /// and their helpers closed before the error is returned.
    pub fn spawn(
        helpers: Vec<ImportHelper>,
        session: &Arc<SessionControl>,
        queue_capacity: usize,
        fail_fast: bool,
    ) -> Result<Self, ImportError> {
        let (jobs, queue) = channel::bounded(queue_capacity.max(1));
        let mut pool = Self {
            jobs: Some(jobs),
            workers: Vec::with_capacity(helpers.len()),
            session: Arc::clone(session),
        };
        for helper in helpers {
            let index = helper.worker();
            let (control, inbox) = channel::bounded(1);
            let context = WorkerContext {
                helper,
                session: Arc::clone(session),
                fail_fast,
            };
            let queue = queue.clone();
            let thread = thread::Builder::new()
                .name(format!("strata-import-{index}"))
                .spawn(move || context.run(&queue, &inbox))
                .map_err(|source| ImportError::SpawnWorker { index, source })?;
            pool.workers.push(Worker {
                index,
                control: Some(control),
                thread: Some(thread),
            });
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Queue `feature`, blocking while the queue is full.
    pub fn submit(&self, feature: Feature) -> Result<ImportHandle, ImportError> {
        let Some(jobs) = &self.jobs else {
            return Err(ImportError::QueueClosed);
        };
        let guard = self.session.begin();
        let (reply, handle) = ImportHandle::pending();
        jobs.send(Job {
            feature,
            reply,
            guard,
        })
        .map_err(|_| ImportError::QueueClosed)?;
        Ok(handle)
    }

    /// Ask every worker to finish in parallel and wait for all of them.
    ///
    /// Returns one result per worker, in worker order.
    pub fn finish(mut self, commit: bool) -> Vec<Result<(), Arc<ImportError>>> {
        self.jobs = None;
        let pending: Vec<_> = self
            .workers
            .iter_mut()
            .map(|worker| {
                let (reply, result) = channel::bounded(1);
                let sent = worker
                    .control
                    .take()
                    .is_some_and(|control| control.send(Finish { commit, reply }).is_ok());
                (worker.index, sent.then_some(result))
            })
            .collect();
        let results = pending
            .into_iter()
            .map(|(index, result)| {
                result
                    .and_then(|receiver| receiver.recv().ok())
                    .unwrap_or_else(|| Err(Arc::new(ImportError::WorkerLost { index })))
            })
            .collect();
        self.join();
        results
    }

    fn join(&mut self) {
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take()
                && thread.join().is_err()
            {
                log::error!("import worker {} panicked", worker.index);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing every channel makes the workers close their helpers and exit.
        self.jobs = None;
        for worker in &mut self.workers {
            worker.control = None;
        }
        self.join();
    }
}

struct WorkerContext {
    helper: ImportHelper,
    session: Arc<SessionControl>,
    fail_fast: bool,
}

impl WorkerContext {
    fn run(mut self, queue: &Receiver<Job>, inbox: &Receiver<Finish>) {
        loop {
            crossbeam::select! {
                recv(queue) -> job => match job {
                    Ok(job) => self.process(job),
                    Err(_) => break,
                },
                recv(inbox) -> request => return self.finish(request.ok()),
            }
        }
        // The queue is closed; wait for the finish request.
        self.finish(inbox.recv().ok());
    }

    fn process(&mut self, job: Job) {
        let Job {
            feature,
            reply,
            guard,
        } = job;
        let outcome = if self.session.is_running() {
            self.import(feature)
        } else {
            self.session.record_cancelled();
            Err(HandleError::Cancelled)
        };
        if reply.send(outcome).is_err() {
            log::trace!("import handle dropped before completion");
        }
        drop(guard);
    }

    fn import(&mut self, feature: Feature) -> Outcome {
        match self.helper.import(feature) {
            Ok(descriptor) => {
                self.session.record_imported();
                Ok(descriptor)
            }
            Err(error) => {
                self.session.record_failed();
                let error = Arc::new(error);
                if error.is_feature_local() && !self.fail_fast {
                    log::warn!("skipping {}", describe(&*error));
                } else if self.session.fail(Arc::clone(&error)) {
                    log::error!(
                        "worker {} stopped the import session: {}",
                        self.helper.worker(),
                        describe(&*error)
                    );
                }
                Err(HandleError::Failed(error))
            }
        }
    }

    /// Close the helper, flushing first when asked to commit.
    ///
    /// A `None` request means the pool went away without a finish request.
    fn finish(self, request: Option<Finish>) {
        let Self {
            mut helper,
            session,
            ..
        } = self;
        let commit = request.as_ref().is_some_and(|request| request.commit);
        let flushed = if commit {
            helper.execute_batch(true, true)
        } else {
            Ok(())
        };
        let result = flushed.and(helper.close()).map_err(|error| {
            let error = Arc::new(error);
            if commit {
                session.fail(Arc::clone(&error));
            }
            error
        });
        match request {
            Some(request) => {
                if request.reply.send(result).is_err() {
                    log::trace!("finish request abandoned");
                }
            }
            None => {
                if let Err(error) = result {
                    log::warn!("import worker shut down uncleanly: {}", describe(&*error));
                }
            }
        }
    }
}
