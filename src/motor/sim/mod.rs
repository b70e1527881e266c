use std::collections::{HashMap, VecDeque};
use std::io;

use log::{debug, warn};

use crate::motor::protocol::frame_codec::{
    build_address, unpack_address, CommandType, DecodeError, MotorAddress, PAYLOAD_LEN,
};
use crate::motor::protocol::param_table::{
    lookup_by_index, ParameterSpec, ParameterType, RunMode, MECH_POS, MECH_VEL,
    POSITION_ACCELERATION, POSITION_SPEED_LIMIT, POSITION_TARGET, RUN_MODE, SPEED_ACCELERATION,
    SPEED_TARGET,
};
use crate::motor::protocol::port_handler::PortHandler;
use crate::motor::protocol::serial_envelope::{encode_envelope, extract_envelopes, parse_envelope};
use crate::motor::protocol::transport::RawFrame;

const FALLBACK_ACCEL: f32 = 20.0;
const SETTLE_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Default)]
pub struct SimMotor {
    registers: HashMap<u16, [u8; 4]>,
    enabled: bool,
    position: f32,
    velocity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimMotorSnapshot {
    pub id: u8,
    pub enabled: bool,
    pub mode: u8,
    pub position: f32,
    pub velocity: f32,
    pub target_position: f32,
    pub target_velocity: f32,
}

impl SimMotor {
    pub fn new() -> Self {
        Self::default()
    }

    fn float(&self, spec: ParameterSpec) -> f32 {
        self.registers
            .get(&spec.index)
            .map(|raw| f32::from_le_bytes(*raw))
            .unwrap_or(0.0)
    }

    fn set_float(&mut self, spec: ParameterSpec, value: f32) {
        self.registers.insert(spec.index, value.to_le_bytes());
    }

    fn mode(&self) -> u8 {
        self.registers.get(&RUN_MODE.index).map(|raw| raw[0]).unwrap_or(0)
    }

    fn raw(&self, index: u16) -> [u8; 4] {
        self.registers.get(&index).copied().unwrap_or([0; 4])
    }

    fn write(&mut self, index: u16, value: [u8; 4]) {
        if index == MECH_POS.index || index == MECH_VEL.index {
            debug!("ignoring write to read-only register {index:#06x}");
            return;
        }
        let value = match lookup_by_index(index).map(|spec| spec.ty) {
            Some(ParameterType::Int8) => [value[0], 0, 0, 0],
            Some(ParameterType::Int16) => [value[0], value[1], 0, 0],
            _ => value,
        };
        self.registers.insert(index, value);
    }

    fn sync_feedback(&mut self) {
        self.set_float(MECH_POS, self.position);
        self.set_float(MECH_VEL, self.velocity);
    }

    fn update_sim(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        if !self.enabled {
            self.velocity = 0.0;
            self.sync_feedback();
            return;
        }

        match self.mode() {
            mode if mode == RunMode::Position.code() => self.step_position(dt),
            mode if mode == RunMode::Velocity.code() => self.step_velocity(dt),
            _ => self.velocity = 0.0,
        }
        self.sync_feedback();
    }

    fn step_position(&mut self, dt: f32) {
        let target = self.float(POSITION_TARGET);
        let limit = self.float(POSITION_SPEED_LIMIT).abs();
        let accel = positive_or(self.float(POSITION_ACCELERATION).abs(), FALLBACK_ACCEL);

        // A zero speed limit holds the current position.
        if limit <= 0.0 {
            self.velocity = 0.0;
            return;
        }

        let delta = target - self.position;
        if delta.abs() < SETTLE_EPSILON && self.velocity.abs() < SETTLE_EPSILON {
            self.position = target;
            self.velocity = 0.0;
            return;
        }

        // Cap speed so the motor can still brake before the target.
        let braking_speed = (2.0 * accel * delta.abs()).sqrt();
        let desired = delta.signum() * limit.min(braking_speed);
        let dv = (desired - self.velocity).clamp(-accel * dt, accel * dt);
        self.velocity += dv;

        let prev = self.position;
        self.position += self.velocity * dt;
        if (target - prev).signum() != (target - self.position).signum() {
            self.position = target;
            self.velocity = 0.0;
        }
    }

    fn step_velocity(&mut self, dt: f32) {
        let target = self.float(SPEED_TARGET);
        let accel = positive_or(self.float(SPEED_ACCELERATION).abs(), FALLBACK_ACCEL);
        let dv = (target - self.velocity).clamp(-accel * dt, accel * dt);
        self.velocity += dv;
        self.position += self.velocity * dt;
    }
}

fn positive_or(value: f32, fallback: f32) -> f32 {
    if value > 0.0 {
        value
    } else {
        fallback
    }
}

/// In-process stand-in for a bus of Robstride motors.
#[derive(Debug, Default)]
pub struct RobstrideBusSim {
    motors: HashMap<u8, SimMotor>,
}

impl RobstrideBusSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_motor(&mut self, id: u8) {
        self.motors.entry(id).or_insert_with(SimMotor::new);
    }

    pub fn remove_motor(&mut self, id: u8) -> bool {
        self.motors.remove(&id).is_some()
    }

    pub fn motor_snapshots(&self) -> Vec<SimMotorSnapshot> {
        let mut ids: Vec<u8> = self.motors.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.snapshot(id)).collect()
    }

    pub fn snapshot(&self, id: u8) -> Option<SimMotorSnapshot> {
        self.motors.get(&id).map(|motor| SimMotorSnapshot {
            id,
            enabled: motor.enabled,
            mode: motor.mode(),
            position: motor.position,
            velocity: motor.velocity,
            target_position: motor.float(POSITION_TARGET),
            target_velocity: motor.float(SPEED_TARGET),
        })
    }

    pub fn step(&mut self, dt: f32) {
        for motor in self.motors.values_mut() {
            motor.update_sim(dt);
        }
    }

    /// Applies one command frame and returns the motor's reply, if it has one.
    ///
    /// Frames for motors not on the bus are ignored.
    pub fn handle_frame(&mut self, frame: &RawFrame) -> Result<Option<RawFrame>, DecodeError> {
        let (command, address) = unpack_address(frame.id)?;
        if frame.data.len() < PAYLOAD_LEN {
            return Err(DecodeError::TooShort {
                len: frame.data.len(),
            });
        }

        let Some(motor) = self.motors.get_mut(&address.motor_id) else {
            return Ok(None);
        };

        let index = u16::from_be_bytes([frame.data[0], frame.data[1]]);
        let mut value = [0u8; 4];
        value.copy_from_slice(&frame.data[4..8]);

        let mut reply = [0u8; PAYLOAD_LEN];
        match command {
            CommandType::Enable => motor.enabled = true,
            CommandType::Disable => {
                motor.enabled = false;
                motor.velocity = 0.0;
                motor.sync_feedback();
            }
            CommandType::Reset => {
                if frame.data[0] == 1 {
                    motor.position = 0.0;
                    motor.sync_feedback();
                }
            }
            CommandType::Read => {
                reply[0..2].copy_from_slice(&index.to_be_bytes());
                reply[4..8].copy_from_slice(&motor.raw(index));
            }
            CommandType::Write => {
                motor.write(index, value);
                reply[0..2].copy_from_slice(&index.to_be_bytes());
                reply[4..8].copy_from_slice(&motor.raw(index));
            }
        }

        // Replies travel the other way, so host and motor swap places in the address.
        let reply_address = MotorAddress {
            host_id: address.motor_id,
            motor_id: address.host_id,
        };
        Ok(Some(RawFrame::new(
            build_address(command, reply_address),
            reply.to_vec(),
        )))
    }

    /// Answers every complete envelope waiting on `port`.
    ///
    /// `rx_buffer` carries partial envelopes between calls. Returns how many were handled.
    pub fn serve_port<P: PortHandler>(
        &mut self,
        port: &mut P,
        rx_buffer: &mut Vec<u8>,
    ) -> io::Result<usize> {
        let available = port.get_bytes_available();
        if available > 0 {
            let mut data = port.read_port(available)?;
            rx_buffer.append(&mut data);
        }

        let envelopes = extract_envelopes(rx_buffer);
        for envelope in &envelopes {
            if let Some(reply) = self.handle_envelope(envelope) {
                port.write_port(&reply)?;
            }
        }
        Ok(envelopes.len())
    }

    fn handle_envelope(&mut self, envelope: &[u8]) -> Option<Vec<u8>> {
        let frame = parse_envelope(envelope);
        match self.handle_frame(&frame) {
            Ok(Some(reply)) => encode_envelope(&reply).ok(),
            Ok(None) => None,
            Err(err) => {
                warn!("sim dropped frame {frame:?}: {err}");
                None
            }
        }
    }
}

/// [`PortHandler`] that answers from a [`RobstrideBusSim`] instead of a serial device.
#[derive(Debug)]
pub struct SimPort {
    sim: RobstrideBusSim,
    tx_buffer: Vec<u8>,
    rx_buffer: VecDeque<u8>,
}

impl SimPort {
    pub fn new(sim: RobstrideBusSim) -> Self {
        Self {
            sim,
            tx_buffer: Vec::new(),
            rx_buffer: VecDeque::new(),
        }
    }

    pub fn sim(&self) -> &RobstrideBusSim {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut RobstrideBusSim {
        &mut self.sim
    }
}

impl PortHandler for SimPort {
    fn clear_port(&mut self) {
        self.rx_buffer.clear();
    }

    fn read_port(&mut self, length: usize) -> io::Result<Vec<u8>> {
        let take = length.min(self.rx_buffer.len());
        Ok(self.rx_buffer.drain(..take).collect())
    }

    fn write_port(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.tx_buffer.extend_from_slice(packet);
        for envelope in extract_envelopes(&mut self.tx_buffer) {
            if let Some(reply) = self.sim.handle_envelope(&envelope) {
                self.rx_buffer.extend(reply);
            }
        }
        Ok(packet.len())
    }

    fn get_bytes_available(&self) -> usize {
        self.rx_buffer.len()
    }
}
