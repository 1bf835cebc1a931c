// Keyboard jog for one node in velocity mode:
// E enable, G go, Space stop, X disable, W/S faster/slower, R/F step size, Q quit
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::{info, warn};

use roboservo_canopen_runtime::canopen::NodeId;
use roboservo_canopen_runtime::config::{TOPIC_CMD, TOPIC_REPLY};
use roboservo_canopen_runtime::drive::{OperationMode, ProfileParams};
use roboservo_canopen_runtime::messages::{CommandReply, DriveCommand};

const STEPS: [f64; 3] = [1.0, 10.0, 50.0]; // rpm per key press
const PROFILE: ProfileParams = ProfileParams {
    velocity: 60.0,
    acceleration: 100.0,
    deceleration: 100.0,
    target: None,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
struct Args {
    /// Node to jog
    #[arg(long, default_value_t = 1)]
    node: u8,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let node = NodeId::new(Args::parse().node)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;
    let replies = session.declare_subscriber(TOPIC_REPLY).await?;

    info!("Jogging node {}", node);
    info!("Controls: E=enable, G=go, Space=stop, X=disable, W/S=velocity, R/F=step, Q=quit");

    enable_raw_mode()?;
    let result = run_jog(node, &publisher, &replies).await;
    disable_raw_mode()?;

    result
}

async fn run_jog(
    node: NodeId,
    publisher: &zenoh::pubsub::Publisher<'_>,
    replies: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
) -> Result<(), BoxError> {
    let mut step_idx: usize = 1;
    let mut velocity = 0.0;

    loop {
        // Show replies as they come back
        while let Ok(Some(sample)) = replies.try_recv() {
            match serde_json::from_slice::<CommandReply>(&sample.payload().to_bytes()) {
                Ok(reply) if reply.ok => info!("{}: ok", reply.op),
                Ok(reply) => warn!("{}: {}", reply.op, reply.error.unwrap_or_default()),
                Err(e) => warn!("Failed to parse reply: {}", e),
            }
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
            continue;
        }

        let cmd = match code {
            KeyCode::Char('e') => DriveCommand::EnableMode {
                node,
                mode: OperationMode::Velocity,
            },
            KeyCode::Char('g') => DriveCommand::StartMotion {
                node,
                profile: ProfileParams {
                    target: Some(velocity),
                    ..PROFILE
                },
            },
            KeyCode::Char(' ') => DriveCommand::StopMotion { node },
            KeyCode::Char('x') => DriveCommand::DisableMode { node },

            KeyCode::Char('w') | KeyCode::Char('s') => {
                let sign = if code == KeyCode::Char('w') { 1.0 } else { -1.0 };
                velocity += sign * STEPS[step_idx];
                info!("Velocity: {} rpm", velocity);
                DriveCommand::SetTarget {
                    node,
                    mode: OperationMode::Velocity,
                    value: velocity,
                }
            }

            // Step size
            KeyCode::Char('r') => {
                step_idx = (step_idx + 1).min(STEPS.len() - 1);
                info!("Step: {} rpm", STEPS[step_idx]);
                continue;
            }
            KeyCode::Char('f') => {
                step_idx = step_idx.saturating_sub(1);
                info!("Step: {} rpm", STEPS[step_idx]);
                continue;
            }

            KeyCode::Char('q') | KeyCode::Esc => {
                // Leave the drive halted rather than spinning
                publisher
                    .put(serde_json::to_string(&DriveCommand::StopMotion { node })?)
                    .await?;
                break;
            }

            _ => continue,
        };

        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}
