//! Packets exchanged with the ground station.
//!
//! Both sides must use the same definition. Postcard is not self-describing,
//! so field order and types must match exactly. Integers are pinned to
//! fixed-width little-endian with `postcard::fixint::le` and floats are
//! always fixed-width in postcard, so every packet of a type has the same
//! size on air. There is no framing and no checksum: a frame is a packet.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::drivers::MAX_FRAME_LEN;
use crate::error::{DecodeError, RadioError};
use crate::types::TelemetrySnapshot;

/// Telemetry packet transmitted from the vehicle to the ground station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPacket {
    /// Degrees, WGS84.
    pub latitude: f64,
    /// Degrees, WGS84.
    pub longitude: f64,
    pub altitude_m: f32,
    pub temperature_c: f32,
    /// Sequence of the snapshot this packet was built from.
    #[serde(with = "postcard::fixint::le")]
    pub sequence: u32,
}

impl TelemetryPacket {
    /// 8 + 8 + 4 + 4 + 4 bytes.
    pub const WIRE_SIZE: usize = 28;

    pub fn from_snapshot(snapshot: &TelemetrySnapshot) -> Self {
        Self {
            latitude: snapshot.latitude,
            longitude: snapshot.longitude,
            altitude_m: snapshot.altitude_m,
            temperature_c: snapshot.temperature_c,
            sequence: snapshot.sequence,
        }
    }

    pub fn encode(&self) -> Result<[u8; Self::WIRE_SIZE], RadioError> {
        let mut buf = [0u8; Self::WIRE_SIZE];
        let used = postcard::to_slice(self, &mut buf)
            .map_err(|_| RadioError::PayloadTooLarge)?
            .len();
        debug_assert_eq!(used, Self::WIRE_SIZE);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        check_length(bytes, Self::WIRE_SIZE)?;
        let packet: Self = postcard::from_bytes(bytes).map_err(|_| DecodeError::Malformed)?;
        let finite = packet.latitude.is_finite()
            && packet.longitude.is_finite()
            && packet.altitude_m.is_finite()
            && packet.temperature_c.is_finite();
        if !finite {
            return Err(DecodeError::NonFinite);
        }
        Ok(packet)
    }
}

bitflags! {
    /// Command bits. Everything above bit 1 is reserved and must be zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u8 {
        const ABORT = 1 << 0;
        const MANUAL_OVERRIDE = 1 << 1;
    }
}

/// Command packet transmitted from the ground station to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandPacket {
    pub target_altitude_m: f32,
    pub flags: u8,
}

impl CommandPacket {
    /// 4 + 1 bytes.
    pub const WIRE_SIZE: usize = 5;

    pub const fn new(target_altitude_m: f32, flags: CommandFlags) -> Self {
        Self {
            target_altitude_m,
            flags: flags.bits(),
        }
    }

    /// Go to `target_altitude_m`, no flags.
    pub const fn target(target_altitude_m: f32) -> Self {
        Self::new(target_altitude_m, CommandFlags::empty())
    }

    pub const fn abort() -> Self {
        Self::new(0.0, CommandFlags::ABORT)
    }

    pub const fn command_flags(&self) -> CommandFlags {
        CommandFlags::from_bits_truncate(self.flags)
    }

    pub const fn is_abort(&self) -> bool {
        self.command_flags().contains(CommandFlags::ABORT)
    }

    pub const fn is_manual_override(&self) -> bool {
        self.command_flags().contains(CommandFlags::MANUAL_OVERRIDE)
    }

    pub fn encode(&self) -> Result<[u8; Self::WIRE_SIZE], RadioError> {
        let mut buf = [0u8; Self::WIRE_SIZE];
        let used = postcard::to_slice(self, &mut buf)
            .map_err(|_| RadioError::PayloadTooLarge)?
            .len();
        debug_assert_eq!(used, Self::WIRE_SIZE);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        check_length(bytes, Self::WIRE_SIZE)?;
        let packet: Self = postcard::from_bytes(bytes).map_err(|_| DecodeError::Malformed)?;
        if !packet.target_altitude_m.is_finite() {
            return Err(DecodeError::NonFinite);
        }
        let reserved = packet.flags & !CommandFlags::all().bits();
        if reserved != 0 {
            return Err(DecodeError::ReservedFlags(reserved));
        }
        Ok(packet)
    }
}

const _: () = assert!(TelemetryPacket::WIRE_SIZE <= MAX_FRAME_LEN);
const _: () = assert!(CommandPacket::WIRE_SIZE <= MAX_FRAME_LEN);

fn check_length(bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() != expected {
        return Err(DecodeError::WrongLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}
