// Zenoh surface around the session worker
//
// Commands arrive on roboservo/cmd and are queued on the worker; each one is
// answered on roboservo/reply once it has run. A fixed-rate tick offers the
// worker a feedback poll, which it drops while busy.

use std::error::Error;

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::config::{SessionConfig, TOPIC_CMD, TOPIC_FEEDBACK, TOPIC_REPLY};
use crate::messages::{CommandOutcome, CommandReply, DriveCommand};
use crate::session::Session;
use crate::transport::{Bitrate, Transport};
use crate::worker::{self, WorkerError};

pub type BoxError = Box<dyn Error + Send + Sync>;

impl CommandReply {
    /// Reply for a command that has finished (or could not be run)
    pub fn new(op: &str, result: Result<CommandOutcome, WorkerError>) -> Self {
        match result {
            Ok(outcome) => Self {
                op: op.to_string(),
                ok: true,
                outcome: Some(outcome),
                error: None,
                failed_step: None,
            },
            Err(e) => Self {
                op: op.to_string(),
                ok: false,
                outcome: None,
                failed_step: match &e {
                    WorkerError::Drive(drive) => drive.failed_step(),
                    WorkerError::Stopped | WorkerError::QueueFull => None,
                },
                error: Some(e.to_string()),
            },
        }
    }
}

pub async fn run<T: Transport + 'static>(
    transport: T,
    config: SessionConfig,
    bitrate: Bitrate,
) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let zenoh = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = zenoh.declare_subscriber(TOPIC_CMD).await?;
    let pub_reply = zenoh.declare_publisher(TOPIC_REPLY).await?;
    let pub_feedback = zenoh.declare_publisher(TOPIC_FEEDBACK).await?;

    let poll_period = config.poll_period();
    let mut session = Session::new(transport, config);
    // Stay up without a bus; the UI can retry with a connect command
    if let Err(e) = session.connect(bitrate) {
        error!("Could not open CAN channel: {}", e);
    }

    let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<CommandReply>();
    let (handle, worker_thread) = worker::spawn(session, feedback_tx);

    let mut tick = interval(poll_period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Runtime started: {}ms feedback poll", poll_period.as_millis());
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}", TOPIC_REPLY, TOPIC_FEEDBACK);

    loop {
        tokio::select! {
            sample = subscriber.recv_async() => {
                let sample = match sample {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!("Command subscriber closed: {}", e);
                        break;
                    }
                };
                let payload = sample.payload().to_bytes();
                let cmd = match serde_json::from_slice::<DriveCommand>(&payload) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        warn!("Failed to parse command: {}", e);
                        continue;
                    }
                };

                info!("Received command: {:?}", cmd);
                let op = cmd.name();
                // Never wait for queue room here; a full queue is answered as an error
                let pending = handle.try_submit(cmd);
                let reply_tx = reply_tx.clone();
                // Wait off the loop so ticks and other commands keep flowing
                tokio::spawn(async move {
                    let result = match pending {
                        Ok(rx) => match rx.await {
                            Ok(result) => result.map_err(WorkerError::from),
                            Err(_) => Err(WorkerError::Stopped),
                        },
                        Err(e) => Err(e),
                    };
                    let _ = reply_tx.send(CommandReply::new(op, result));
                });
            }
            _ = tick.tick() => {
                handle.tick();
            }
            Some(feedback) = feedback_rx.recv() => {
                let json = serde_json::to_string(&feedback)?;
                pub_feedback.put(json).await?;
            }
            Some(reply) = reply_rx.recv() => {
                if let Some(error) = &reply.error {
                    warn!("{} failed: {}", reply.op, error);
                }
                let json = serde_json::to_string(&reply)?;
                pub_reply.put(json).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    drop(handle);
    match tokio::task::spawn_blocking(move || worker_thread.join()).await? {
        Ok(mut session) => session.disconnect(),
        Err(_) => error!("Session worker panicked"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canopen::{NodeId, Object, SdoError};
    use crate::drive::DriveError;

    #[test]
    fn test_reply_for_success() {
        let reply = CommandReply::new("scan_nodes", Ok(CommandOutcome::Nodes { nodes: vec![] }));
        assert!(reply.ok);
        assert_eq!(reply.op, "scan_nodes");
        assert_eq!(reply.outcome, Some(CommandOutcome::Nodes { nodes: vec![] }));
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_reply_names_failed_step() {
        let node = NodeId::new(3).unwrap();
        let err = DriveError::SequenceAborted {
            node,
            sequence: "start",
            step: 2,
            object: Object::ProfileAcceleration,
            source: SdoError::Timeout {
                node,
                object: Object::ProfileAcceleration.index(),
            },
        };
        let reply = CommandReply::new("start_motion", Err(err.into()));
        assert!(!reply.ok);
        assert_eq!(reply.failed_step, Some(2));
        assert!(reply.error.unwrap().contains("start"));
    }

    #[test]
    fn test_reply_for_full_queue() {
        let reply = CommandReply::new("enable_mode", Err(WorkerError::QueueFull));
        assert!(!reply.ok);
        assert!(reply.outcome.is_none());
        assert_eq!(reply.error.as_deref(), Some("Session worker queue is full"));
    }

    #[test]
    fn test_reply_for_stopped_worker() {
        let reply = CommandReply::new("reboot", Err(WorkerError::Stopped));
        assert!(!reply.ok);
        assert_eq!(reply.failed_step, None);
        assert_eq!(reply.error.as_deref(), Some("Session worker has stopped"));
    }
}
