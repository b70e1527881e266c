//! One motor's command/response session.
//!
//! Every operation is a single blocking exchange: build the frame, hand it to the transport,
//! wait up to the reply timeout, interpret what came back. Nothing is retried. A missing reply
//! is "no new data" rather than an error; only transport failures abort a call.

use std::f32::consts::{PI, TAU};
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::motor::protocol::frame_codec::{
    decode_payload_as_float, CommandFrame, CommandType, DecodeError, MotorAddress,
    DEFAULT_HOST_ID,
};
use crate::motor::protocol::param_table::{
    parameter_name, ParameterSpec, RunMode, MECH_POS, MECH_VEL, POSITION_03_SPEED,
    POSITION_ACCELERATION, POSITION_SPEED_LIMIT, POSITION_TARGET, RUN_MODE, SPEED_ACCELERATION,
    SPEED_MAX_CURRENT, SPEED_TARGET,
};
use crate::motor::protocol::response::{interpret_frame, ParameterValue};
use crate::motor::protocol::transport::{RawFrame, Transport, TransportError};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_SPEED: f32 = 10.0;
pub const DEFAULT_MAX_ACC: f32 = 20.0;
pub const DEFAULT_MAX_CURRENT: f32 = 23.0;

#[derive(Debug, Error)]
pub enum MotorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorConfig {
    pub host_id: u8,
    pub reply_timeout: Duration,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            host_id: DEFAULT_HOST_ID,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl MotorConfig {
    pub fn with_host_id(mut self, host_id: u8) -> Self {
        self.host_id = host_id;
        self
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }
}

/// Adjusts `target` by whole turns so it is the equivalent angle nearest `current`.
///
/// `current` may be many turns away from zero; the result stays within half a turn of it.
pub fn fold_target(current: f32, target: f32) -> f32 {
    let mut target = target;
    let delta = target - current;
    if delta > PI {
        target -= TAU;
    } else if delta < -PI {
        target += TAU;
    }
    target + ((current - target) / TAU).round() * TAU
}

/// Session for one motor. Owns its transport handle; use a
/// [`SharedTransport`](crate::motor::protocol::transport::SharedTransport) to put several
/// sessions on one bus.
#[derive(Debug)]
pub struct MotorSession<T: Transport> {
    transport: T,
    address: MotorAddress,
    reply_timeout: Duration,
    last_value: f32,
}

impl<T: Transport> MotorSession<T> {
    pub fn new(transport: T, motor_id: u8) -> Self {
        Self::with_config(transport, motor_id, MotorConfig::default())
    }

    pub fn with_config(transport: T, motor_id: u8, config: MotorConfig) -> Self {
        Self {
            transport,
            address: MotorAddress::new(motor_id).with_host_id(config.host_id),
            reply_timeout: config.reply_timeout,
            last_value: 0.0,
        }
    }

    pub fn address(&self) -> MotorAddress {
        self.address
    }

    /// Value of the last successful read.
    pub fn last_value(&self) -> f32 {
        self.last_value
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn exchange(
        &mut self,
        frame: &CommandFrame,
        clear_first: bool,
    ) -> Result<Option<RawFrame>, MotorError> {
        let raw = frame.to_raw();
        debug!("Sent: {raw:?}");

        let reply = self
            .transport
            .transact(&raw, self.reply_timeout, clear_first)?;
        match &reply {
            Some(reply) => debug!("Received: {reply:?}"),
            None => debug!(
                "no reply from motor {} within {:?}",
                self.address.motor_id, self.reply_timeout
            ),
        }
        Ok(reply)
    }

    /// Sends a command whose reply is drained but not interpreted.
    fn send_command(&mut self, frame: CommandFrame) -> Result<(), MotorError> {
        self.exchange(&frame, false)?;
        Ok(())
    }

    fn read_reply(&mut self, spec: ParameterSpec) -> Result<Option<RawFrame>, MotorError> {
        let frame = CommandFrame::new(CommandType::Read, self.address, Some(spec), 0.0);
        self.exchange(&frame, true)
    }

    /// Warns when a reply names a different parameter than the one requested.
    fn check_reply(&self, requested: ParameterSpec, replied: ParameterSpec) -> bool {
        if replied.index == requested.index {
            return true;
        }
        warn!(
            "motor {} answered {} to a read of {}",
            self.address.motor_id, replied.name, requested.name
        );
        false
    }

    pub fn enable(&mut self) -> Result<(), MotorError> {
        self.send_command(CommandFrame::new(CommandType::Enable, self.address, None, 0.0))
    }

    pub fn disable(&mut self) -> Result<(), MotorError> {
        self.send_command(CommandFrame::new(CommandType::Disable, self.address, None, 0.0))
    }

    /// Sets the motor's current mechanical position as zero.
    pub fn reset_position(&mut self) -> Result<(), MotorError> {
        self.send_command(CommandFrame::reset(self.address))
    }

    pub fn write_parameter(&mut self, spec: ParameterSpec, value: f32) -> Result<(), MotorError> {
        self.send_command(CommandFrame::new(
            CommandType::Write,
            self.address,
            Some(spec),
            value,
        ))
    }

    pub fn set_run_mode(&mut self, mode: RunMode) -> Result<(), MotorError> {
        self.write_parameter(RUN_MODE, mode.code() as f32)
    }

    /// Reads a parameter and reports a missing reply as `Ok(None)`.
    ///
    /// Truncated replies and replies naming an index outside the table are returned as
    /// [`DecodeError`]s. A decoded value also becomes [`last_value`](Self::last_value).
    pub fn request_parameter(
        &mut self,
        spec: ParameterSpec,
    ) -> Result<Option<ParameterValue>, MotorError> {
        let Some(reply) = self.read_reply(spec)? else {
            return Ok(None);
        };

        let (replied, value) = interpret_frame(&reply)?;
        self.check_reply(spec, replied);
        self.last_value = value.as_f32();
        Ok(Some(value))
    }

    /// Reads a parameter as `f32`.
    ///
    /// Without a usable reply this returns the previous value unchanged; a caller that needs to
    /// tell stale data apart should use [`request_parameter`](Self::request_parameter).
    pub fn read_parameter(&mut self, spec: ParameterSpec) -> Result<f32, MotorError> {
        let Some(reply) = self.read_reply(spec)? else {
            warn!(
                "no response from motor {} for {} within timeout",
                self.address.motor_id, spec.name
            );
            return Ok(self.last_value);
        };

        match interpret_frame(&reply) {
            Ok((replied, value)) => {
                self.check_reply(spec, replied);
                self.last_value = value.as_f32();
            }
            Err(DecodeError::UnknownParameter(index)) => {
                // Raw float in bytes 4-7, as the motor firmware reports most registers.
                if let Ok(value) = decode_payload_as_float(&reply.data) {
                    debug!(
                        "reply index {index:#06x} ({}) decoded as float",
                        parameter_name(index)
                    );
                    self.last_value = value;
                }
            }
            Err(err) => warn!("discarding reply from motor {}: {err}", self.address.motor_id),
        }
        Ok(self.last_value)
    }

    pub fn read_position(&mut self) -> Result<f32, MotorError> {
        self.read_parameter(MECH_POS)
    }

    pub fn read_velocity(&mut self) -> Result<f32, MotorError> {
        self.read_parameter(MECH_VEL)
    }

    pub fn set_position(&mut self, target_rad: f32) -> Result<f32, MotorError> {
        self.set_position_with(target_rad, DEFAULT_SPEED, DEFAULT_MAX_ACC)
    }

    /// Moves to `target_rad` along the shortest path from the current multi-turn position.
    ///
    /// Returns the absolute target actually written to `POSITION_TARGET`.
    pub fn set_position_with(
        &mut self,
        target_rad: f32,
        speed: f32,
        max_acc: f32,
    ) -> Result<f32, MotorError> {
        let current = self.read_parameter(MECH_POS)?;
        let target = fold_target(current, target_rad);
        info!(
            "motor {} position {target_rad:.4} rad -> {target:.4} (from {current:.4}), \
             speed limit {speed} rad/s",
            self.address.motor_id
        );

        self.set_run_mode(RunMode::Position)?;
        self.enable()?;
        self.write_parameter(POSITION_SPEED_LIMIT, speed)?;
        self.write_parameter(POSITION_03_SPEED, speed)?;
        self.write_parameter(POSITION_ACCELERATION, max_acc)?;
        self.write_parameter(POSITION_TARGET, target)?;
        Ok(target)
    }

    pub fn set_velocity(&mut self, target_rad_s: f32) -> Result<(), MotorError> {
        self.set_velocity_with(target_rad_s, DEFAULT_MAX_ACC, DEFAULT_MAX_CURRENT)
    }

    pub fn set_velocity_with(
        &mut self,
        target_rad_s: f32,
        max_acc: f32,
        max_current: f32,
    ) -> Result<(), MotorError> {
        info!(
            "motor {} velocity {target_rad_s} rad/s, max current {max_current} A",
            self.address.motor_id
        );

        self.set_run_mode(RunMode::Velocity)?;
        self.enable()?;
        self.write_parameter(SPEED_MAX_CURRENT, max_current)?;
        self.write_parameter(SPEED_ACCELERATION, max_acc)?;
        self.write_parameter(SPEED_TARGET, target_rad_s)
    }

    /// Brings the position loop to rest at zero, then re-zeroes the encoder.
    pub fn zero_position(&mut self) -> Result<(), MotorError> {
        self.write_parameter(POSITION_SPEED_LIMIT, 0.0)?;
        self.write_parameter(POSITION_TARGET, 0.0)?;
        self.reset_position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    use crate::motor::protocol::frame_codec::build_payload;

    /// Replies from a fixed script and records everything sent.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        replies: VecDeque<Option<RawFrame>>,
        sent: Vec<RawFrame>,
        clears: usize,
    }

    impl ScriptedTransport {
        fn reply_with(mut self, data: Vec<u8>) -> Self {
            self.replies.push_back(Some(RawFrame::new(0x1100_01FD, data)));
            self
        }

        fn silence(mut self) -> Self {
            self.replies.push_back(None);
            self
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
            self.sent.push(frame.clone());
            Ok(())
        }

        fn try_receive(&mut self, _timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
            Ok(self.replies.pop_front().flatten())
        }

        fn clear(&mut self) -> Result<(), TransportError> {
            self.clears += 1;
            Ok(())
        }
    }

    /// Never answers, waiting out the full timeout like an unplugged bus.
    struct SilentTransport;

    impl Transport for SilentTransport {
        fn send(&mut self, _frame: &RawFrame) -> Result<(), TransportError> {
            Ok(())
        }

        fn try_receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
            std::thread::sleep(timeout);
            Ok(None)
        }
    }

    struct BrokenTransport;

    impl Transport for BrokenTransport {
        fn send(&mut self, _frame: &RawFrame) -> Result<(), TransportError> {
            Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "adapter unplugged",
            )))
        }

        fn try_receive(&mut self, _timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
            Ok(None)
        }
    }

    fn sent_parameters(transport: &ScriptedTransport) -> Vec<(u32, Vec<u8>)> {
        transport
            .sent
            .iter()
            .map(|frame| (frame.id, frame.data.clone()))
            .collect()
    }

    #[test]
    fn read_parameter_returns_reply_value() {
        let transport = ScriptedTransport::default()
            .reply_with(build_payload(Some(&MECH_POS), 1.5708).to_vec());
        let mut session = MotorSession::new(transport, 1);

        assert_eq!(session.read_parameter(MECH_POS).expect("read"), 1.5708);
        assert_eq!(session.last_value(), 1.5708);

        let transport = session.into_transport();
        assert_eq!(transport.clears, 1);
        assert_eq!(
            sent_parameters(&transport),
            vec![(0x1100_FD01, vec![0x19, 0x70, 0, 0, 0, 0, 0, 0])]
        );
    }

    #[test]
    fn read_parameter_keeps_cached_value_on_timeout() {
        let transport = ScriptedTransport::default()
            .reply_with(build_payload(Some(&MECH_POS), 0.25).to_vec())
            .silence();
        let mut session = MotorSession::new(transport, 1);

        assert_eq!(session.read_parameter(MECH_POS).expect("read"), 0.25);
        assert_eq!(session.read_parameter(MECH_POS).expect("read"), 0.25);
    }

    #[test]
    fn silent_motor_read_is_bounded_by_timeout() {
        let config = MotorConfig::default();
        let mut session = MotorSession::with_config(SilentTransport, 1, config);

        let start = Instant::now();
        let value = session.read_parameter(MECH_POS).expect("read");
        let elapsed = start.elapsed();

        assert_eq!(value, 0.0);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn request_parameter_reports_missing_reply() {
        let mut session = MotorSession::new(ScriptedTransport::default().silence(), 1);
        assert_eq!(session.request_parameter(MECH_POS).expect("request"), None);
    }

    #[test]
    fn incomplete_reply_is_discarded() {
        let transport = ScriptedTransport::default()
            .reply_with(build_payload(Some(&MECH_POS), 2.0).to_vec())
            .reply_with(vec![0x19, 0x70, 0, 0, 0x00])
            .reply_with(vec![0x19, 0x70, 0, 0, 0x00]);
        let mut session = MotorSession::new(transport, 1);

        assert_eq!(session.read_parameter(MECH_POS).expect("read"), 2.0);
        assert_eq!(session.read_parameter(MECH_POS).expect("read"), 2.0);
        assert!(matches!(
            session.request_parameter(MECH_POS),
            Err(MotorError::Decode(DecodeError::IncompleteFrame { len: 5, .. }))
        ));
    }

    #[test]
    fn unknown_index_reply_reads_as_float() {
        let mut data = build_payload(Some(&MECH_POS), -4.5).to_vec();
        data[0] = 0x30;
        data[1] = 0x22;
        let transport = ScriptedTransport::default().reply_with(data.clone()).reply_with(data);
        let mut session = MotorSession::new(transport, 1);

        assert_eq!(session.read_parameter(MECH_POS).expect("read"), -4.5);
        assert!(matches!(
            session.request_parameter(MECH_POS),
            Err(MotorError::Decode(DecodeError::UnknownParameter(0x3022)))
        ));
    }

    #[test]
    fn mismatched_reply_is_flagged() {
        let transport = ScriptedTransport::default()
            .reply_with(build_payload(Some(&MECH_VEL), 0.5).to_vec())
            .reply_with(build_payload(Some(&MECH_VEL), 0.75).to_vec());
        let mut session = MotorSession::new(transport, 1);

        assert!(session.check_reply(MECH_POS, MECH_POS));
        assert!(!session.check_reply(MECH_POS, MECH_VEL));

        assert_eq!(session.read_parameter(MECH_POS).expect("read"), 0.5);
        assert_eq!(
            session.request_parameter(MECH_POS).expect("request"),
            Some(ParameterValue::Float32(0.75))
        );
    }

    #[test]
    fn int8_reply_is_widened() {
        let transport = ScriptedTransport::default()
            .reply_with(build_payload(Some(&RUN_MODE), 2.0).to_vec());
        let mut session = MotorSession::new(transport, 1);
        assert_eq!(
            session.request_parameter(RUN_MODE).expect("request"),
            Some(ParameterValue::Int8(2))
        );
        assert_eq!(session.last_value(), 2.0);
    }

    #[test]
    fn transport_failure_is_surfaced() {
        let mut session = MotorSession::new(BrokenTransport, 1);
        assert!(matches!(
            session.enable(),
            Err(MotorError::Transport(TransportError::Io(_)))
        ));
    }

    #[test]
    fn simple_commands_use_expected_frames() {
        let mut session = MotorSession::new(ScriptedTransport::default(), 127);
        session.enable().expect("enable");
        session.disable().expect("disable");
        session.reset_position().expect("reset");

        let transport = session.into_transport();
        assert_eq!(transport.clears, 0);
        assert_eq!(
            sent_parameters(&transport),
            vec![
                (0x0300_FD7F, vec![0; 8]),
                (0x0400_FD7F, vec![0; 8]),
                (0x0600_FD7F, vec![1, 0, 0, 0, 0, 0, 0, 0]),
            ]
        );
    }

    #[test]
    fn host_id_comes_from_config() {
        let config = MotorConfig::default().with_host_id(0x10);
        let mut session = MotorSession::with_config(ScriptedTransport::default(), 2, config);
        session.enable().expect("enable");
        assert_eq!(session.into_transport().sent[0].id, 0x0300_1002);
    }

    #[test]
    fn set_position_writes_fixed_sequence() {
        let transport = ScriptedTransport::default()
            .reply_with(build_payload(Some(&MECH_POS), 3.0).to_vec());
        let mut session = MotorSession::new(transport, 1);

        let target = session.set_position(-3.0).expect("set position");
        assert!((target - (-3.0 + TAU)).abs() < 1e-5);

        let transport = session.into_transport();
        let sent: Vec<(u32, Vec<u8>)> = sent_parameters(&transport);
        let write = |spec: ParameterSpec, value: f32| {
            (0x1200_FD01, build_payload(Some(&spec), value).to_vec())
        };
        assert_eq!(
            sent,
            vec![
                (0x1100_FD01, build_payload(Some(&MECH_POS), 0.0).to_vec()),
                write(RUN_MODE, 1.0),
                (0x0300_FD01, vec![0; 8]),
                write(POSITION_SPEED_LIMIT, DEFAULT_SPEED),
                write(POSITION_03_SPEED, DEFAULT_SPEED),
                write(POSITION_ACCELERATION, DEFAULT_MAX_ACC),
                write(POSITION_TARGET, target),
            ]
        );
    }

    #[test]
    fn set_velocity_writes_fixed_sequence() {
        let mut session = MotorSession::new(ScriptedTransport::default(), 1);
        session.set_velocity_with(-1.0, 5.0, 12.0).expect("set velocity");

        let write = |spec: ParameterSpec, value: f32| {
            (0x1200_FD01, build_payload(Some(&spec), value).to_vec())
        };
        assert_eq!(
            sent_parameters(&session.into_transport()),
            vec![
                write(RUN_MODE, 2.0),
                (0x0300_FD01, vec![0; 8]),
                write(SPEED_MAX_CURRENT, 12.0),
                write(SPEED_ACCELERATION, 5.0),
                write(SPEED_TARGET, -1.0),
            ]
        );
    }

    #[test]
    fn zero_position_stops_then_resets() {
        let mut session = MotorSession::new(ScriptedTransport::default(), 1);
        session.zero_position().expect("zero");

        let ids: Vec<u32> = session.into_transport().sent.iter().map(|frame| frame.id).collect();
        assert_eq!(ids, vec![0x1200_FD01, 0x1200_FD01, 0x0600_FD01]);
    }

    #[test]
    fn fold_takes_short_way_across_pi() {
        let folded = fold_target(3.0, -3.0);
        assert!((folded - 3.0).abs() <= PI + 1e-5);
        let turns = (folded - -3.0) / TAU;
        assert!((turns - turns.round()).abs() < 1e-5);
    }

    #[test]
    fn fold_stays_near_multi_turn_position() {
        for current in [-40.0f32, -7.5, -PI, 0.0, 0.1, PI, 6.0, 20.0, 123.4] {
            for target in [-6.0f32, -PI, -1.0, 0.0, 1.0, 2.5, PI, 6.0] {
                let folded = fold_target(current, target);
                assert!(
                    (folded - current).abs() <= PI + 1e-4,
                    "current {current} target {target} folded {folded}"
                );
                let turns = (folded - target) / TAU;
                assert!((turns - turns.round()).abs() < 1e-4);
            }
        }
    }
}
