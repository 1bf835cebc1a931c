// Session worker: one thread owns the Session and runs jobs in order
//
// Foreground commands and poll ticks arrive on the same channel, so bus
// access is serialized without a lock. A poll tick never waits: it is
// dropped while a command is running or queued, or another tick is queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::config::WORKER_QUEUE_DEPTH;
use crate::drive::DriveError;
use crate::messages::{CommandOutcome, DriveCommand, Feedback};
use crate::session::Session;
use crate::transport::{Bitrate, Transport};

pub type CommandResult = Result<CommandOutcome, DriveError>;

pub enum Job {
    Command {
        command: DriveCommand,
        reply: oneshot::Sender<CommandResult>,
    },
    PollTick,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error("Session worker has stopped")]
    Stopped,

    #[error("Session worker queue is full")]
    QueueFull,
}

#[derive(Debug, Default)]
struct WorkerFlags {
    busy: AtomicBool,
    tick_pending: AtomicBool,
    /// Commands submitted but not yet picked up by the worker
    queued: AtomicUsize,
}

/// Cloneable front end of the session worker
#[derive(Clone)]
pub struct SessionHandle {
    jobs: mpsc::Sender<Job>,
    flags: Arc<WorkerFlags>,
}

impl SessionHandle {
    /// Queue a command. The returned receiver resolves once it has run.
    pub async fn submit(
        &self,
        command: DriveCommand,
    ) -> Result<oneshot::Receiver<CommandResult>, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.flags.queued.fetch_add(1, Ordering::AcqRel);
        if self.jobs.send(Job::Command { command, reply }).await.is_err() {
            self.flags.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(WorkerError::Stopped);
        }
        Ok(rx)
    }

    /// Queue a command without waiting for room in the queue
    pub fn try_submit(
        &self,
        command: DriveCommand,
    ) -> Result<oneshot::Receiver<CommandResult>, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.flags.queued.fetch_add(1, Ordering::AcqRel);
        match self.jobs.try_send(Job::Command { command, reply }) {
            Ok(()) => Ok(rx),
            Err(e) => {
                self.flags.queued.fetch_sub(1, Ordering::AcqRel);
                Err(match e {
                    TrySendError::Full(_) => WorkerError::QueueFull,
                    TrySendError::Closed(_) => WorkerError::Stopped,
                })
            }
        }
    }

    /// Run a command and wait for its outcome
    pub async fn execute(&self, command: DriveCommand) -> Result<CommandOutcome, WorkerError> {
        let rx = self.submit(command).await?;
        Ok(rx.await.map_err(|_| WorkerError::Stopped)??)
    }

    /// Offer a feedback poll. Returns false if the tick was skipped.
    pub fn tick(&self) -> bool {
        if self.is_busy() {
            trace!("Poll tick skipped, worker busy");
            return false;
        }
        if self.flags.tick_pending.swap(true, Ordering::AcqRel) {
            trace!("Poll tick skipped, previous tick still queued");
            return false;
        }
        match self.jobs.try_send(Job::PollTick) {
            Ok(()) => true,
            Err(_) => {
                self.flags.tick_pending.store(false, Ordering::Release);
                false
            }
        }
    }

    /// True while a command is running or waiting to run
    pub fn is_busy(&self) -> bool {
        // The worker raises `busy` before it drops `queued`, so read `queued` first
        self.flags.queued.load(Ordering::Acquire) > 0 || self.flags.busy.load(Ordering::Acquire)
    }
}

/// Start the worker thread. It runs until every handle is dropped and then
/// hands the session back through the join handle.
pub fn spawn<T: Transport + 'static>(
    session: Session<T>,
    feedback: mpsc::UnboundedSender<Feedback>,
) -> (SessionHandle, thread::JoinHandle<Session<T>>) {
    let (jobs, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
    let flags = Arc::new(WorkerFlags::default());

    let worker = Worker {
        session,
        jobs: rx,
        flags: Arc::clone(&flags),
        feedback,
    };
    let join = thread::spawn(move || worker.run());

    (SessionHandle { jobs, flags }, join)
}

struct Worker<T> {
    session: Session<T>,
    jobs: mpsc::Receiver<Job>,
    flags: Arc<WorkerFlags>,
    feedback: mpsc::UnboundedSender<Feedback>,
}

impl<T: Transport> Worker<T> {
    fn run(mut self) -> Session<T> {
        info!("Session worker started");

        while let Some(job) = self.jobs.blocking_recv() {
            self.flags.busy.store(true, Ordering::Release);
            match job {
                Job::Command { command, reply } => {
                    self.flags.queued.fetch_sub(1, Ordering::AcqRel);
                    debug!("Running {}", command.name());
                    let result = execute(&mut self.session, &command);
                    self.flags.busy.store(false, Ordering::Release);
                    if reply.send(result).is_err() {
                        debug!("Caller went away before {} finished", command.name());
                    }
                }
                Job::PollTick => {
                    self.flags.tick_pending.store(false, Ordering::Release);
                    self.poll();
                    self.flags.busy.store(false, Ordering::Release);
                }
            }
        }

        info!("Session worker stopped");
        self.session
    }

    fn poll(&mut self) {
        for node in self.session.moving_nodes() {
            if let Some(degrees) = self.session.poll_actual_position(node) {
                // Nobody listening is fine; telemetry is best-effort
                let _ = self.feedback.send(Feedback::Position { node, degrees });
            }
        }
    }
}

/// Run one command against the session
pub fn execute<T: Transport>(session: &mut Session<T>, command: &DriveCommand) -> CommandResult {
    use DriveCommand::*;

    match command {
        Connect { bitrate_kbps } => {
            let bitrate = Bitrate::from_kbps(*bitrate_kbps)
                .ok_or(DriveError::InvalidBitrate(*bitrate_kbps))?;
            session.connect(bitrate)?;
        }
        Disconnect => session.disconnect(),
        ScanNodes => {
            let nodes = session.scan_nodes()?.into_iter().collect();
            return Ok(CommandOutcome::Nodes { nodes });
        }
        EnableMode { node, mode } => session.enable_mode(*node, *mode)?,
        DisableMode { node } => session.disable_mode(*node)?,
        SetTarget { node, mode, value } => session.set_target(*node, *mode, *value)?,
        StartMotion { node, profile } => session.start_motion(*node, profile)?,
        StopMotion { node } => session.stop_motion(*node)?,
        PollActualPosition { node } => {
            let degrees = session.poll_actual_position(*node);
            return Ok(CommandOutcome::Position { degrees });
        }
        SetNodeId { old, new } => session.set_node_id(*old, *new)?,
        SaveParameters { node } => session.save_parameters(*node)?,
        RestoreParameters { node } => session.restore_parameters(*node)?,
        Reboot { node } => session.reboot(*node)?,
    }
    Ok(CommandOutcome::Done)
}
