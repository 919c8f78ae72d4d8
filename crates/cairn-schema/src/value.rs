//! Field values exchanged with the host object model.
//!
//! [`FieldValue`] is the currency of `read_field` / `write_field`. The small
//! math aggregates mirror what hosts typically keep on their entities and are
//! encoded as fixed runs of `f64`s.

use cairn_archive::codec::{ReadExt, WriteExt};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use uuid::Uuid;

use crate::entity::EntityId;
use crate::kind::DataKind;
use crate::Result;

// ---------------------------------------------------------------------------
// Math aggregates
// ---------------------------------------------------------------------------

/// Three-component vector (positions, velocities, scale).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vec3 = Vec3 { x: 1.0, y: 1.0, z: 1.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        out.put_f64(self.x)?;
        out.put_f64(self.y)?;
        out.put_f64(self.z)?;
        Ok(())
    }

    pub fn read_from(input: &mut impl Read) -> Result<Self> {
        Ok(Self {
            x: input.get_f64()?,
            y: input.get_f64()?,
            z: input.get_f64()?,
        })
    }
}

/// Euler rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotator {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl Rotator {
    pub const fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }

    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        out.put_f64(self.pitch)?;
        out.put_f64(self.yaw)?;
        out.put_f64(self.roll)?;
        Ok(())
    }

    pub fn read_from(input: &mut impl Read) -> Result<Self> {
        Ok(Self {
            pitch: input.get_f64()?,
            yaw: input.get_f64()?,
            roll: input.get_f64()?,
        })
    }
}

/// Rotation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Rotation, translation and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub rotation: Quat,
    pub translation: Vec3,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
        scale: Vec3::ONE,
    };

    /// Identity rotation and unit scale at `translation`.
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Layout: quaternion (x, y, z, w), translation, scale.
    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        out.put_f64(self.rotation.x)?;
        out.put_f64(self.rotation.y)?;
        out.put_f64(self.rotation.z)?;
        out.put_f64(self.rotation.w)?;
        self.translation.write_to(out)?;
        self.scale.write_to(out)
    }

    pub fn read_from(input: &mut impl Read) -> Result<Self> {
        let rotation = Quat {
            x: input.get_f64()?,
            y: input.get_f64()?,
            z: input.get_f64()?,
            w: input.get_f64()?,
        };
        Ok(Self {
            rotation,
            translation: Vec3::read_from(input)?,
            scale: Vec3::read_from(input)?,
        })
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// CallbackBinding
// ---------------------------------------------------------------------------

/// One entry of a multicast callback list: call `function` on `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackBinding {
    pub target: EntityId,
    pub function: String,
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A single persisted value, or an array of them.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Enum(u16),
    Vector(Vec3),
    Rotator(Rotator),
    Transform(Transform),
    Guid(Uuid),
    String(String),
    Name(String),
    Text(String),
    EntityRef(Option<EntityId>),
    AssetPath(Option<String>),
    ClassRef(Option<String>),
    Callbacks(Vec<CallbackBinding>),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    /// The kind of a single value; `None` for arrays.
    pub fn kind(&self) -> Option<DataKind> {
        Some(match self {
            FieldValue::Bool(_) => DataKind::Bool,
            FieldValue::U8(_) => DataKind::U8,
            FieldValue::U16(_) => DataKind::U16,
            FieldValue::U32(_) => DataKind::U32,
            FieldValue::U64(_) => DataKind::U64,
            FieldValue::I8(_) => DataKind::I8,
            FieldValue::I16(_) => DataKind::I16,
            FieldValue::I32(_) => DataKind::I32,
            FieldValue::I64(_) => DataKind::I64,
            FieldValue::F32(_) => DataKind::F32,
            FieldValue::F64(_) => DataKind::F64,
            FieldValue::Enum(_) => DataKind::Enum,
            FieldValue::Vector(_) => DataKind::Vector,
            FieldValue::Rotator(_) => DataKind::Rotator,
            FieldValue::Transform(_) => DataKind::Transform,
            FieldValue::Guid(_) => DataKind::Guid,
            FieldValue::String(_) => DataKind::String,
            FieldValue::Name(_) => DataKind::Name,
            FieldValue::Text(_) => DataKind::Text,
            FieldValue::EntityRef(_) => DataKind::EntityRef,
            FieldValue::AssetPath(_) => DataKind::AssetPath,
            FieldValue::ClassRef(_) => DataKind::ClassRef,
            FieldValue::Callbacks(_) => DataKind::Callbacks,
            FieldValue::Array(_) => return None,
        })
    }

    /// The value a freshly constructed field of `kind` holds.
    pub fn default_for(kind: DataKind) -> FieldValue {
        match kind {
            DataKind::Bool => FieldValue::Bool(false),
            DataKind::U8 => FieldValue::U8(0),
            DataKind::U16 => FieldValue::U16(0),
            DataKind::U32 => FieldValue::U32(0),
            DataKind::U64 => FieldValue::U64(0),
            DataKind::I8 => FieldValue::I8(0),
            DataKind::I16 => FieldValue::I16(0),
            DataKind::I32 => FieldValue::I32(0),
            DataKind::I64 => FieldValue::I64(0),
            DataKind::F32 => FieldValue::F32(0.0),
            DataKind::F64 => FieldValue::F64(0.0),
            DataKind::Enum => FieldValue::Enum(0),
            DataKind::Vector => FieldValue::Vector(Vec3::ZERO),
            DataKind::Rotator => FieldValue::Rotator(Rotator::default()),
            DataKind::Transform => FieldValue::Transform(Transform::IDENTITY),
            DataKind::Guid => FieldValue::Guid(Uuid::nil()),
            DataKind::String => FieldValue::String(String::new()),
            DataKind::Name => FieldValue::Name(String::new()),
            DataKind::Text => FieldValue::Text(String::new()),
            DataKind::EntityRef => FieldValue::EntityRef(None),
            DataKind::AssetPath => FieldValue::AssetPath(None),
            DataKind::ClassRef => FieldValue::ClassRef(None),
            DataKind::Callbacks => FieldValue::Callbacks(Vec::new()),
        }
    }

    /// Whether this value (or every element, for arrays) is of `kind`.
    pub fn is_kind(&self, kind: DataKind) -> bool {
        match self {
            FieldValue::Array(items) => items.iter().all(|v| v.kind() == Some(kind)),
            other => other.kind() == Some(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_encodes_as_ten_doubles() {
        let t = Transform {
            rotation: Quat {
                x: 0.1,
                y: 0.2,
                z: 0.3,
                w: 0.9,
            },
            translation: Vec3::new(1.0, 2.0, 3.0),
            scale: Vec3::new(2.0, 2.0, 2.0),
        };
        let mut buf = Vec::new();
        t.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 10 * 8);
        assert_eq!(Transform::read_from(&mut buf.as_slice()).unwrap(), t);
    }

    #[test]
    fn defaults_report_their_own_kind() {
        for kind in [
            DataKind::Bool,
            DataKind::Enum,
            DataKind::Transform,
            DataKind::EntityRef,
            DataKind::Callbacks,
        ] {
            assert_eq!(FieldValue::default_for(kind).kind(), Some(kind));
        }
    }

    #[test]
    fn arrays_check_every_element() {
        let ok = FieldValue::Array(vec![FieldValue::I32(1), FieldValue::I32(2)]);
        let mixed = FieldValue::Array(vec![FieldValue::I32(1), FieldValue::U8(2)]);
        assert!(ok.is_kind(DataKind::I32));
        assert!(!mixed.is_kind(DataKind::I32));
        assert_eq!(ok.kind(), None);
    }
}
