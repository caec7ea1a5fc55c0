use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use vile_core::protocol::MAILBOX_COUNT;
use vile_core::{
    InputPort, NxtSession, OutputPort, SensorMode, SensorType, SessionConfig, SetOutputState,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "LEGO NXT USB Tool (Pure Rust)", long_about = None)]
struct Args {
    /// Path to a TOML session config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the battery voltage
    Battery,
    /// Start a program on the brick
    Start { program: String },
    /// Stop the running program
    Stop,
    /// Print the name of the running program
    Current,
    /// Play a sound file
    Sound {
        file: String,
        /// Repeat until stopped
        #[arg(short = 'l', long = "loop")]
        repeat: bool,
    },
    /// Play a tone
    Tone {
        frequency_hz: u16,
        #[arg(default_value_t = 500)]
        duration_ms: u16,
    },
    /// Stop the playing sound
    StopSound,
    /// Drive a motor
    Motor {
        /// a, b, c or all
        port: OutputPort,
        /// -100..=100
        #[arg(short, long, default_value_t = 75, allow_negative_numbers = true)]
        power: i8,
        /// Degrees to run for (0 = forever)
        #[arg(short, long, default_value_t = 0)]
        limit: u32,
        /// Hold the motor in place
        #[arg(long, conflicts_with = "coast")]
        brake: bool,
        /// Cut power and let the motor spin down
        #[arg(long)]
        coast: bool,
    },
    /// Print a motor's state
    MotorState { port: OutputPort },
    /// Configure a sensor port
    SensorMode {
        /// 1..4
        port: InputPort,
        sensor_type: SensorType,
        #[arg(default_value = "raw")]
        sensor_mode: SensorMode,
    },
    /// Read a sensor
    Sensor { port: InputPort },
    /// Reset a sensor's scaled value
    ResetSensor { port: InputPort },
    /// Reset a motor's position counter
    ResetMotor {
        port: OutputPort,
        /// Reset the block-relative counter only
        #[arg(short, long)]
        relative: bool,
    },
    /// Reset the brick's sleep timer
    KeepAlive,
    /// Post a message to a brick mailbox
    MessageSend {
        /// 0..9
        #[arg(value_parser = clap::value_parser!(u8).range(0..i64::from(MAILBOX_COUNT)))]
        inbox: u8,
        text: String,
    },
    /// Read a message from a brick mailbox
    MessageRead {
        /// 0..9
        #[arg(value_parser = clap::value_parser!(u8).range(0..i64::from(MAILBOX_COUNT)))]
        inbox: u8,
        /// Leave the message in the mailbox
        #[arg(long)]
        keep: bool,
    },
    /// Follow brick attach/detach until interrupted
    Watch,
    /// Print the effective configuration
    Config {
        /// Write it to this file instead
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match args.command {
        Cmd::Config { write } => {
            match write {
                Some(path) => {
                    config.save_to_file(&path)?;
                    info!(path = %path.display(), "Config written");
                }
                None => print!("{}", config.to_toml()?),
            }
            Ok(())
        }
        Cmd::Watch => watch(&config),
        command => {
            let session = NxtSession::connect(&config)?;
            execute(&session, command)
        }
    }
}

fn execute(session: &NxtSession<vile_core::NusbHost>, command: Cmd) -> Result<()> {
    match command {
        Cmd::Battery => println!("{} mV", session.battery_level()?),
        Cmd::Start { program } => session.start_program(&program)?,
        Cmd::Stop => session.stop_program()?,
        Cmd::Current => println!("{}", session.current_program_name()?),
        Cmd::Sound { file, repeat } => {
            session.play_sound_file(&file, repeat)?;
        }
        Cmd::Tone {
            frequency_hz,
            duration_ms,
        } => session.play_tone(frequency_hz, duration_ms)?,
        Cmd::StopSound => session.stop_sound()?,
        Cmd::Motor {
            port,
            power,
            limit,
            brake,
            coast,
        } => {
            let state = if brake {
                SetOutputState::brake(port)
            } else if coast {
                SetOutputState::coast(port)
            } else {
                SetOutputState {
                    tacho_limit: limit,
                    ..SetOutputState::run(port, power.clamp(-100, 100))
                }
            };
            session.set_output_state(&state)?;
        }
        Cmd::MotorState { port } => {
            let s = session.output_state(port)?;
            println!("port:        {}", s.port);
            println!("power:       {}", s.power);
            println!("mode:        {}", s.mode);
            println!("regulation:  {:?}", s.regulation);
            println!("run state:   {:?}", s.run_state);
            println!("tacho limit: {}", s.tacho_limit);
            println!("tacho count: {}", s.tacho_count);
            println!("block count: {}", s.block_tacho_count);
            println!("rotation:    {}", s.rotation_count);
        }
        Cmd::SensorMode {
            port,
            sensor_type,
            sensor_mode,
        } => session.set_input_mode(port, sensor_type, sensor_mode)?,
        Cmd::Sensor { port } => {
            let v = session.input_values(port)?;
            if !v.valid {
                warn!(port = %port, "Reading not yet valid for the configured mode");
            }
            println!("type:       {:?} ({:?})", v.sensor_type, v.sensor_mode);
            println!("raw:        {}", v.raw_value);
            println!("normalized: {}", v.normalized_value);
            println!("scaled:     {}", v.scaled_value);
            println!("calibrated: {}", v.calibrated_value);
        }
        Cmd::ResetSensor { port } => session.reset_input_scaled_value(port)?,
        Cmd::ResetMotor { port, relative } => session.reset_motor_position(port, relative)?,
        Cmd::KeepAlive => println!("sleep limit: {} ms", session.keep_alive()?),
        Cmd::MessageSend { inbox, text } => session.message_write(inbox, text.as_bytes())?,
        Cmd::MessageRead { inbox, keep } => {
            // Replies queued for the host sit in the remote inboxes 10..19.
            let remote = inbox + MAILBOX_COUNT;
            let msg = session.message_read(remote, inbox, !keep)?;
            println!("{}", msg.as_text());
        }
        Cmd::Watch | Cmd::Config { .. } => unreachable!("handled before connecting"),
    }
    Ok(())
}

fn watch(config: &SessionConfig) -> Result<()> {
    let session = NxtSession::start(config)?;
    let _watcher = session.watch(config.poll_interval());
    info!("Watching for NXT bricks (Ctrl-C to quit)...");

    let mut was_ready = false;
    loop {
        let ready = session.is_ready();
        if ready && !was_ready {
            match session.battery_level() {
                Ok(mv) => info!(millivolts = mv, "Brick ready"),
                Err(e) => warn!(error = %e, "Brick bound but not answering"),
            }
        }
        was_ready = ready;
        thread::sleep(config.poll_interval());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_read_accepts_local_inboxes() {
        let args = Args::try_parse_from(["vile", "message-read", "9", "--keep"]).unwrap();
        assert!(matches!(
            args.command,
            Cmd::MessageRead { inbox: 9, keep: true }
        ));
    }

    #[test]
    fn test_message_read_rejects_remote_inbox() {
        assert!(Args::try_parse_from(["vile", "message-read", "10"]).is_err());
        assert!(Args::try_parse_from(["vile", "message-read", "250"]).is_err());
    }

    #[test]
    fn test_message_send_rejects_out_of_range_inbox() {
        assert!(Args::try_parse_from(["vile", "message-send", "10", "hi"]).is_err());
        assert!(Args::try_parse_from(["vile", "message-send", "0", "hi"]).is_ok());
    }
}
