//! Packed pose/velocity record ("core data").
//!
//! Core data is owned by the host's physics/transform layer, not by the
//! property schema. It is a fixed layout selected by a leading version tag:
//!
//! ```text
//! v1: u16 version | u8 hidden | Transform | Vec3 velocity
//!     | Vec3 angular velocity | u8 has control rotation | Rotator
//! ```
//!
//! A record with an unknown version is never guessed at. The restore side
//! reports it and the entity keeps its current pose.

use std::io::Cursor;

use cairn_archive::codec::{ReadExt, WriteExt};
use cairn_schema::value::{Rotator, Transform, Vec3};

use crate::{Result, StateError};

/// Version written by [`CoreState::encode`].
pub const CORE_STATE_VERSION: u16 = 1;

/// Visibility, pose and motion of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoreState {
    pub hidden: bool,
    pub transform: Transform,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Secondary view rotation of controllable entities.
    pub control_rotation: Option<Rotator>,
}

impl CoreState {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        out.put_u16(CORE_STATE_VERSION)?;
        out.put_bool(self.hidden)?;
        self.transform.write_to(&mut out)?;
        self.velocity.write_to(&mut out)?;
        self.angular_velocity.write_to(&mut out)?;
        out.put_bool(self.control_rotation.is_some())?;
        self.control_rotation
            .unwrap_or_default()
            .write_to(&mut out)?;
        Ok(out)
    }

    /// Decode a record written by any supported version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut input = Cursor::new(bytes);
        let version = input
            .get_u16()
            .map_err(|_| StateError::CorruptCoreState {
                details: format!("{} byte record has no version tag", bytes.len()),
            })?;
        match version {
            1 => decode_v1(&mut input).map_err(|err| StateError::CorruptCoreState {
                details: format!("truncated v1 record: {err}"),
            }),
            other => Err(StateError::CorruptCoreState {
                details: format!("unknown version {other}"),
            }),
        }
    }
}

fn decode_v1(input: &mut Cursor<&[u8]>) -> cairn_schema::Result<CoreState> {
    let hidden = input.get_bool()?;
    let transform = Transform::read_from(input)?;
    let velocity = Vec3::read_from(input)?;
    let angular_velocity = Vec3::read_from(input)?;
    let has_control = input.get_bool()?;
    let rotation = Rotator::read_from(input)?;
    Ok(CoreState {
        hidden,
        transform,
        velocity,
        angular_velocity,
        control_rotation: has_control.then_some(rotation),
    })
}

/// Which parts of a [`CoreState`] the host should apply.
///
/// Visibility is always applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreApply {
    pub pose: bool,
    pub velocity: bool,
    pub control_rotation: bool,
}

impl CoreApply {
    pub const ALL: CoreApply = CoreApply {
        pose: true,
        velocity: true,
        control_rotation: true,
    };

    /// Only visibility.
    pub const NONE: CoreApply = CoreApply {
        pose: false,
        velocity: false,
        control_rotation: false,
    };
}
