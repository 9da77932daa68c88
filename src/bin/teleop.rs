// Keyboard teleop: WASD walk, Q/E turn, R/F speed, 1/2 gait, B balance, P servo power, Esc quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use aranea_runtime::command::{Command, WireCommand};
use aranea_runtime::config::{MAX_STEP, TOPIC_CMD};
use aranea_runtime::motion::{GaitId, GaitRequest};

const SPEEDS: [i32; 3] = [4, 7, 10];
const TURN_ANGLE: i32 = 10; // deg per cycle
const INPUT_TIMEOUT_MS: u64 = 300; // Send a stop after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: WASD=walk, Q/E=turn, R/F=speed, 1/2=gait, B=balance, P=servo power, Space=stop, Esc=quit");
    info!("Speed: LOW, gait: {:?}", GaitId::Tripod);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    command: WireCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(command.to_string()).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut gait = GaitId::Tripod;
    let mut balance = false;
    let mut servo_on = true;

    let mut moving = false;
    let mut last_movement_input = Instant::now();

    loop {
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                let step = match code {
                    KeyCode::Char('w') if pressed => Some((0, MAX_STEP, 0)),
                    KeyCode::Char('s') if pressed => Some((0, -MAX_STEP, 0)),
                    KeyCode::Char('a') if pressed => Some((-MAX_STEP, 0, 0)),
                    KeyCode::Char('d') if pressed => Some((MAX_STEP, 0, 0)),
                    KeyCode::Char('q') if pressed => Some((0, 0, -TURN_ANGLE)),
                    KeyCode::Char('e') if pressed => Some((0, 0, TURN_ANGLE)),
                    _ => None,
                };

                if let Some((x, y, angle)) = step {
                    let request = GaitRequest::new(gait, x, y, SPEEDS[speed_idx], angle);
                    send(publisher, WireCommand::Control(Command::Move(request))).await?;
                    moving = true;
                    last_movement_input = Instant::now();
                    continue;
                }

                match code {
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('1') if pressed => {
                        gait = GaitId::Tripod;
                        info!("Gait: {:?}", gait);
                    }
                    KeyCode::Char('2') if pressed => {
                        gait = GaitId::Wave;
                        info!("Gait: {:?}", gait);
                    }
                    KeyCode::Char('b') if pressed => {
                        balance = !balance;
                        info!("Balance: {}", balance);
                        send(publisher, WireCommand::Control(Command::Balance(balance))).await?;
                    }
                    KeyCode::Char('p') if pressed => {
                        servo_on = !servo_on;
                        info!("Servo power: {}", servo_on);
                        send(publisher, WireCommand::ServoPower(servo_on)).await?;
                    }
                    KeyCode::Char(' ') if pressed => {
                        send(publisher, WireCommand::Control(Command::stop())).await?;
                        moving = false;
                    }

                    // Quit
                    KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Re-seat the feet once input stops
        if moving && last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            send(publisher, WireCommand::Control(Command::stop())).await?;
            moving = false;
        }
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
