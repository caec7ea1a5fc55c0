//! NXT Session - the typed command API over the bound brick.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::attach::{Attachment, Lease, TransportOf, UsbHost, Watcher};
use crate::config::SessionConfig;
use crate::events::{NxtEvent, NxtObserver, PacketDirection, TracingObserver};
use crate::protocol::command::*;
use crate::protocol::{
    COMMAND_REPLY, Command, DIRECT_COMMAND_NO_REPLY, FrameError, InputPort, InputValues, OutputPort,
    OutputState, READ_SIZE, ReplyHeader, SensorMode, SensorType, SetOutputState, Status, decode_reply,
};
use crate::transport::{NusbHost, TransportError, UsbTransport};

#[cfg(feature = "extensions")]
use crate::protocol::reply::MailboxMessage;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("No NXT brick is bound")]
    NotReady,

    #[error("Short {direction} transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        direction: PacketDirection,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed reply: {0}")]
    FrameMismatch(FrameError),

    #[error("Brick reported {0}")]
    Device(Status),

    #[error("Brick was detached during the command")]
    Detached,

    #[error("No reply after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(FrameError),
}

impl CommandError {
    /// Device status carried by the failure, if the brick reported one.
    pub fn status(&self) -> Option<Status> {
        match self {
            CommandError::Device(status) => Some(*status),
            _ => None,
        }
    }
}

impl From<FrameError> for CommandError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Length { expected, actual } => CommandError::ShortTransfer {
                direction: PacketDirection::Rx,
                expected,
                actual,
            },
            FrameError::Status(status) => CommandError::Device(status),
            other => CommandError::FrameMismatch(other),
        }
    }
}

impl From<TransportError> for CommandError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { timeout_ms } => CommandError::Timeout { timeout_ms },
            TransportError::Disconnected => CommandError::Detached,
            other => CommandError::Transport(other),
        }
    }
}

/// Packet bytes carried in observer events.
const EVENT_DATA_LEN: usize = 32;

/// Late replies to timed-out commands skipped before a reply is decoded.
const MAX_STALE_REPLIES: usize = 4;

/// A well-formed reply that answers some other opcode. It is left in the
/// IN pipe when an earlier command timed out before the brick answered.
fn is_stale_reply(opcode: u8, reply: &[u8]) -> bool {
    ReplyHeader::from_bytes(reply)
        .is_ok_and(|header| header.reply_type == COMMAND_REPLY && header.opcode != opcode)
}

/// NXT Session - issues direct commands to the bound brick.
///
/// Commands are serialised: at most one exchange is on the wire at a time,
/// whichever thread issues it.
pub struct NxtSession<H: UsbHost> {
    attachment: Arc<Attachment<H>>,
    exchange_lock: Mutex<()>,
    observer: Arc<dyn NxtObserver>,
}

impl NxtSession<NusbHost> {
    /// Start the driver on the host USB stack and bind the first brick found.
    #[instrument(level = "info", skip(config))]
    pub fn connect(config: &SessionConfig) -> Result<Self> {
        let session = Self::start(config)?;
        let present = session.attachment.host().scan()?;
        session.attachment.refresh(&present)?;
        if !session.is_ready() {
            return Err(anyhow!(
                "No NXT brick found (VID={:04X} PID={:04X})",
                config.device.vendor_id,
                config.device.product_id
            ));
        }
        Ok(session)
    }

    /// Start the driver without binding; pair with `watch` to follow hotplug.
    pub fn start(config: &SessionConfig) -> Result<Self> {
        let host = NusbHost::new(config.transfer_timeout());
        let attachment = Arc::new(Attachment::new(
            host,
            config.device.clone(),
            config.configure_timeout(),
        ));
        attachment.start()?;
        Ok(Self::new(attachment))
    }
}

impl<H: UsbHost + 'static> NxtSession<H> {
    /// Create a session with the default tracing observer.
    pub fn new(attachment: Arc<Attachment<H>>) -> Self {
        Self::with_observer(attachment, Arc::new(TracingObserver))
    }

    pub fn with_observer(attachment: Arc<Attachment<H>>, observer: Arc<dyn NxtObserver>) -> Self {
        Self {
            attachment,
            exchange_lock: Mutex::new(()),
            observer,
        }
    }

    pub fn attachment(&self) -> &Arc<Attachment<H>> {
        &self.attachment
    }

    /// Spawn a hotplug watcher for this session's attachment.
    pub fn watch(&self, interval: std::time::Duration) -> Watcher {
        Watcher::spawn(Arc::clone(&self.attachment), interval)
    }

    /// Whether commands can currently be issued.
    pub fn is_ready(&self) -> bool {
        self.attachment.is_ready()
    }

    fn emit_packet(&self, direction: PacketDirection, opcode: u8, data: &[u8]) {
        self.observer.on_event(&NxtEvent::Packet {
            direction,
            opcode,
            length: data.len(),
            data: Some(data.iter().take(EVENT_DATA_LEN).copied().collect()),
        });
    }

    /// Transport failures on a lease that has since gone stale are detaches.
    fn transport_error(&self, lease: &Lease<TransportOf<H>>, e: TransportError) -> CommandError {
        if self.attachment.is_current(lease) {
            e.into()
        } else {
            CommandError::Detached
        }
    }

    fn send(
        &self,
        lease: &Lease<TransportOf<H>>,
        opcode: u8,
        frame: &[u8],
    ) -> Result<(), CommandError> {
        let sent = lease
            .transport
            .write(frame)
            .map_err(|e| self.transport_error(lease, e))?;
        if !self.attachment.is_current(lease) {
            return Err(CommandError::Detached);
        }
        self.emit_packet(PacketDirection::Tx, opcode, &frame[..sent.min(frame.len())]);
        if sent != frame.len() {
            return Err(CommandError::ShortTransfer {
                direction: PacketDirection::Tx,
                expected: frame.len(),
                actual: sent,
            });
        }
        Ok(())
    }

    fn finish<T>(&self, opcode: u8, result: Result<T, CommandError>) -> Result<T, CommandError> {
        if let Err(e) = &result {
            self.observer.on_event(&NxtEvent::CommandFailed {
                opcode,
                message: e.to_string(),
            });
        }
        result
    }

    /// Send `command` and decode its reply.
    pub fn exchange<C: Command>(&self, command: &C) -> Result<C::Reply, CommandError> {
        let _guard = self
            .exchange_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let result = self.round_trip(command);
        self.finish(C::OPCODE, result)
    }

    fn round_trip<C: Command>(&self, command: &C) -> Result<C::Reply, CommandError> {
        let lease = self.attachment.lease().ok_or(CommandError::NotReady)?;
        self.send(&lease, C::OPCODE, &command.encode())?;

        let mut discarded = 0;
        loop {
            let reply = self.receive(&lease, C::OPCODE)?;
            if discarded < MAX_STALE_REPLIES && is_stale_reply(C::OPCODE, &reply) {
                discarded += 1;
                debug!(
                    opcode = C::OPCODE,
                    stale_opcode = reply[1],
                    "Discarding reply to an earlier command"
                );
                continue;
            }
            return Ok(decode_reply::<C::Reply>(C::OPCODE, &reply)?);
        }
    }

    fn receive(&self, lease: &Lease<TransportOf<H>>, opcode: u8) -> Result<Vec<u8>, CommandError> {
        let reply = lease
            .transport
            .read(READ_SIZE)
            .map_err(|e| self.transport_error(lease, e))?;
        if !self.attachment.is_current(lease) {
            return Err(CommandError::Detached);
        }
        self.emit_packet(PacketDirection::Rx, opcode, &reply);
        debug!(opcode, bytes = reply.len(), "Reply received");
        Ok(reply)
    }

    /// Send `command` with the no-reply class and do not wait for an answer.
    pub fn post<C: Command>(&self, command: &C) -> Result<(), CommandError> {
        let _guard = self
            .exchange_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let result = match self.attachment.lease() {
            Some(lease) => self.send(
                &lease,
                C::OPCODE,
                &command.encode_with_class(DIRECT_COMMAND_NO_REPLY),
            ),
            None => Err(CommandError::NotReady),
        };
        self.finish(C::OPCODE, result)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn start_program(&self, filename: &str) -> Result<(), CommandError> {
        self.exchange(&StartProgram::new(filename))?;
        info!(program = filename, "Program started");
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    pub fn stop_program(&self) -> Result<(), CommandError> {
        self.exchange(&StopProgram)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn current_program_name(&self) -> Result<String, CommandError> {
        Ok(self.exchange(&GetCurrentProgramName)?.0)
    }

    /// Returns the loop flag the sound was started with.
    #[instrument(level = "debug", skip(self))]
    pub fn play_sound_file(&self, filename: &str, looping: bool) -> Result<bool, CommandError> {
        self.exchange(&PlaySoundFile::new(filename, looping))?;
        Ok(looping)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn play_tone(&self, frequency_hz: u16, duration_ms: u16) -> Result<(), CommandError> {
        self.exchange(&PlayTone {
            frequency_hz,
            duration_ms,
        })
    }

    #[instrument(level = "debug", skip(self))]
    pub fn stop_sound(&self) -> Result<(), CommandError> {
        self.exchange(&StopSound)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn set_output_state(&self, state: &SetOutputState) -> Result<(), CommandError> {
        self.exchange(state)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn output_state(&self, port: OutputPort) -> Result<OutputState, CommandError> {
        self.exchange(&GetOutputState { port })
    }

    #[instrument(level = "debug", skip(self))]
    pub fn set_input_mode(
        &self,
        port: InputPort,
        sensor_type: SensorType,
        sensor_mode: SensorMode,
    ) -> Result<(), CommandError> {
        self.exchange(&SetInputMode {
            port,
            sensor_type,
            sensor_mode,
        })
    }

    #[instrument(level = "debug", skip(self))]
    pub fn input_values(&self, port: InputPort) -> Result<InputValues, CommandError> {
        self.exchange(&GetInputValues { port })
    }

    #[instrument(level = "debug", skip(self))]
    pub fn reset_input_scaled_value(&self, port: InputPort) -> Result<(), CommandError> {
        self.exchange(&ResetInputScaledValue { port })
    }

    #[instrument(level = "debug", skip(self))]
    pub fn reset_motor_position(&self, port: OutputPort, relative: bool) -> Result<(), CommandError> {
        self.exchange(&ResetMotorPosition { port, relative })
    }

    /// Battery voltage in millivolts.
    #[instrument(level = "debug", skip(self))]
    pub fn battery_level(&self) -> Result<u16, CommandError> {
        Ok(self.exchange(&GetBatteryLevel)?.millivolts)
    }

    /// Reset the brick's sleep timer. Returns the sleep limit in ms.
    #[instrument(level = "debug", skip(self))]
    pub fn keep_alive(&self) -> Result<u32, CommandError> {
        Ok(self.exchange(&KeepAliveRequest)?.sleep_limit_ms)
    }
}

#[cfg(feature = "extensions")]
impl<H: UsbHost + 'static> NxtSession<H> {
    /// Bytes ready to read from a low-speed device.
    #[instrument(level = "debug", skip(self))]
    pub fn ls_status(&self, port: InputPort) -> Result<u8, CommandError> {
        Ok(self.exchange(&LsGetStatus { port })?.bytes_ready)
    }

    #[instrument(level = "debug", skip(self, data), fields(len = data.len()))]
    pub fn ls_write(&self, port: InputPort, data: &[u8], rx_len: u8) -> Result<(), CommandError> {
        let command = LsWrite::new(port, data, rx_len).map_err(CommandError::InvalidArgument)?;
        self.exchange(&command)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn ls_read(&self, port: InputPort) -> Result<Vec<u8>, CommandError> {
        Ok(self.exchange(&LsRead { port })?.0)
    }

    #[instrument(level = "debug", skip(self, message), fields(len = message.len()))]
    pub fn message_write(&self, inbox: u8, message: &[u8]) -> Result<(), CommandError> {
        let command = MessageWrite::new(inbox, message).map_err(CommandError::InvalidArgument)?;
        self.exchange(&command)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn message_read(
        &self,
        remote_inbox: u8,
        local_inbox: u8,
        remove: bool,
    ) -> Result<MailboxMessage, CommandError> {
        self.exchange(&MessageRead {
            remote_inbox,
            local_inbox,
            remove,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceFilter;
    use crate::events::NullObserver;
    use crate::protocol::constants::*;
    use crate::transport::{MockHost, MockTransport, PluggedDevice};
    use std::thread;
    use std::time::Duration;

    struct Rig {
        session: NxtSession<MockHost>,
        brick: PluggedDevice,
    }

    impl Rig {
        fn transport(&self) -> &MockTransport {
            &self.brick.transport
        }
    }

    fn unbound() -> Rig {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 2);
        host.plug(brick.clone());
        let attachment = Arc::new(Attachment::with_observer(
            host,
            DeviceFilter::default(),
            Duration::from_millis(50),
            Arc::new(NullObserver),
        ));
        attachment.start().unwrap();
        Rig {
            session: NxtSession::with_observer(attachment, Arc::new(NullObserver)),
            brick,
        }
    }

    fn ready() -> Rig {
        let rig = unbound();
        rig.session.attachment().attach(&rig.brick.candidate).unwrap();
        rig
    }

    #[test]
    fn test_not_ready_sends_nothing() {
        let rig = unbound();
        assert!(!rig.session.is_ready());
        assert!(matches!(
            rig.session.battery_level(),
            Err(CommandError::NotReady)
        ));
        assert!(matches!(
            rig.session.post(&StopProgram),
            Err(CommandError::NotReady)
        ));
        assert!(rig.transport().writes().is_empty());
    }

    #[test]
    fn test_start_program_ok() {
        let rig = ready();
        rig.transport()
            .queue_status(OPCODE_START_PROGRAM, Status::Ok);

        rig.session.start_program("DEMO.rxe").unwrap();

        let writes = rig.transport().writes();
        assert_eq!(writes.len(), 1);
        let mut expected = vec![0u8; 22];
        expected[1] = 0x00;
        expected[2..10].copy_from_slice(b"DEMO.rxe");
        assert_eq!(writes[0], expected);
    }

    #[test]
    fn test_start_program_missing_file() {
        let rig = ready();
        rig.transport().queue_reply(&[0x02, 0x00, 0xBD]);

        let err = rig.session.start_program("DEMO.rxe").unwrap_err();
        assert!(matches!(err, CommandError::Device(Status::RequestFailed)));
        assert_eq!(err.status().map(|s| s.code()), Some(0xBD));
    }

    #[test]
    fn test_battery_level() {
        let rig = ready();
        rig.transport().queue_reply(&[0x02, 0x0B, 0x00, 0x2C, 0x1D]);

        assert_eq!(rig.session.battery_level().unwrap(), 7468);
        assert_eq!(rig.transport().writes(), vec![vec![0x00, 0x0B]]);
    }

    #[test]
    fn test_short_reply_is_short_transfer() {
        let rig = ready();
        rig.transport().queue_reply(&[0x02, 0x0B, 0x00, 0x2C]);

        assert!(matches!(
            rig.session.battery_level(),
            Err(CommandError::ShortTransfer {
                direction: PacketDirection::Rx,
                expected: 5,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_stale_reply_is_discarded() {
        let rig = ready();
        // Late keep-alive answer still queued from a command that timed out.
        rig.transport().queue_reply(&[0x02, 0x0D, 0x00, 0x60, 0xEA, 0x00, 0x00]);
        rig.transport().queue_reply(&[0x02, 0x0B, 0x00, 0x2C, 0x1D]);

        assert_eq!(rig.session.battery_level().unwrap(), 7468);

        rig.transport().queue_status(OPCODE_STOP_PROGRAM, Status::Ok);
        rig.session.stop_program().unwrap();
        assert_eq!(rig.transport().writes().len(), 2);
    }

    #[test]
    fn test_timeout_then_late_reply_recovers() {
        let rig = ready();
        assert!(matches!(
            rig.session.battery_level(),
            Err(CommandError::Timeout { .. })
        ));

        rig.transport().queue_reply(&[0x02, 0x0B, 0x00, 0x2C, 0x1D]);
        rig.transport().queue_reply(&[0x02, 0x0D, 0x00, 0x60, 0xEA, 0x00, 0x00]);
        assert_eq!(rig.session.keep_alive().unwrap(), 60_000);
    }

    #[test]
    fn test_wrong_opcode_is_frame_mismatch() {
        let rig = ready();
        for _ in 0..=MAX_STALE_REPLIES {
            rig.transport().queue_reply(&[0x02, 0x0C, 0x00, 0x2C, 0x1D]);
        }

        assert!(matches!(
            rig.session.battery_level(),
            Err(CommandError::FrameMismatch(FrameError::Opcode {
                expected: 0x0B,
                actual: 0x0C
            }))
        ));
    }

    #[test]
    fn test_wrong_reply_type_is_not_skipped() {
        let rig = ready();
        rig.transport().queue_reply(&[0x01, 0x0D, 0x00, 0x2C, 0x1D]);

        assert!(matches!(
            rig.session.battery_level(),
            Err(CommandError::FrameMismatch(FrameError::ReplyType { actual: 0x01 }))
        ));
    }

    #[test]
    fn test_transport_errors_map_to_command_errors() {
        assert!(matches!(
            CommandError::from(TransportError::Timeout { timeout_ms: 250 }),
            CommandError::Timeout { timeout_ms: 250 }
        ));
        assert!(matches!(
            CommandError::from(TransportError::Disconnected),
            CommandError::Detached
        ));
        assert!(matches!(
            CommandError::from(TransportError::ReadFailed("stall".into())),
            CommandError::Transport(TransportError::ReadFailed(_))
        ));
    }

    #[test]
    fn test_short_write() {
        let rig = ready();
        rig.transport().short_next_write(1);

        assert!(matches!(
            rig.session.stop_program(),
            Err(CommandError::ShortTransfer {
                direction: PacketDirection::Tx,
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_timeout() {
        let rig = ready();
        assert!(matches!(
            rig.session.keep_alive(),
            Err(CommandError::Timeout { timeout_ms: 1000 })
        ));
    }

    #[test]
    fn test_detach_mid_command() {
        let rig = ready();
        let attachment = Arc::clone(rig.session.attachment());
        let candidate = rig.brick.candidate.clone();
        rig.transport().on_write(move |_| {
            attachment.detach(&candidate);
        });
        rig.transport()
            .queue_status(OPCODE_STOP_PROGRAM, Status::Ok);

        assert!(matches!(
            rig.session.stop_program(),
            Err(CommandError::Detached)
        ));
        assert!(!rig.session.is_ready());
    }

    #[test]
    fn test_disconnect_is_detached() {
        let rig = ready();
        rig.transport().disconnect();
        assert!(matches!(
            rig.session.stop_sound(),
            Err(CommandError::Detached)
        ));
    }

    #[test]
    fn test_play_sound_file_echoes_loop_flag() {
        let rig = ready();
        rig.transport()
            .queue_status(OPCODE_PLAY_SOUND_FILE, Status::Ok);
        assert!(rig.session.play_sound_file("Woops.rso", true).unwrap());
        assert_eq!(rig.transport().writes()[0][2], 0x01);
    }

    #[test]
    fn test_current_program_name() {
        let rig = ready();
        let mut reply = vec![0x02, OPCODE_GET_CURRENT_PROGRAM_NAME, 0x00];
        let mut name = [0u8; 20];
        name[..8].copy_from_slice(b"DEMO.rxe");
        reply.extend_from_slice(&name);
        rig.transport().queue_reply(&reply);

        assert_eq!(rig.session.current_program_name().unwrap(), "DEMO.rxe");
    }

    #[test]
    fn test_post_uses_no_reply_class() {
        let rig = ready();
        rig.session.post(&StopSound).unwrap();
        assert_eq!(rig.transport().writes(), vec![vec![0x80, 0x0C]]);
    }

    #[test]
    fn test_commands_are_serialised() {
        let rig = ready();
        for _ in 0..8 {
            rig.transport().queue_reply(&[0x02, 0x0B, 0x00, 0x2C, 0x1D]);
        }
        let session = &rig.session;
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| assert_eq!(session.battery_level().unwrap(), 7468));
            }
        });
        assert_eq!(rig.transport().writes().len(), 8);
    }

    #[cfg(feature = "extensions")]
    #[test]
    fn test_message_write_rejects_bad_inbox_without_sending() {
        let rig = ready();
        assert!(matches!(
            rig.session.message_write(10, b"hi"),
            Err(CommandError::InvalidArgument(_))
        ));
        assert!(rig.transport().writes().is_empty());
    }

    #[cfg(feature = "extensions")]
    #[test]
    fn test_ls_status() {
        let rig = ready();
        rig.transport()
            .queue_reply(&[0x02, OPCODE_LS_GET_STATUS, 0x00, 0x04]);
        assert_eq!(rig.session.ls_status(InputPort::Four).unwrap(), 4);
        assert_eq!(rig.transport().writes(), vec![vec![0x00, 0x0E, 0x03]]);
    }
}
