//! Typed uniform storage for one compiled program.
//!
//! Values are kept per name whether or not the program declares them. When
//! the block is packed, names missing from the reflected [`UniformLayout`]
//! are skipped; settings and shader source are edited independently, so a
//! mismatch is expected while the user is typing.
use std::collections::BTreeMap;

use tracing::trace;
use wgpu::naga;

use crate::preprocess::{RESOLUTION_MEMBER, SETTING_MEMBER_PREFIX};
use crate::types::{UniformValue, UniformValues};

/// Smallest uniform buffer we allocate, even for programs without a block.
pub(crate) const MIN_BLOCK_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl SlotType {
    fn from_naga(inner: &naga::TypeInner) -> Option<Self> {
        match *inner {
            naga::TypeInner::Scalar(scalar) if scalar.width == 4 => match scalar.kind {
                naga::ScalarKind::Sint | naga::ScalarKind::Uint => Some(SlotType::Int),
                naga::ScalarKind::Float => Some(SlotType::Float),
                _ => None,
            },
            naga::TypeInner::Vector { size, scalar }
                if scalar.kind == naga::ScalarKind::Float && scalar.width == 4 =>
            {
                Some(match size {
                    naga::VectorSize::Bi => SlotType::Vec2,
                    naga::VectorSize::Tri => SlotType::Vec3,
                    naga::VectorSize::Quad => SlotType::Vec4,
                })
            }
            _ => None,
        }
    }
}

/// Byte offset and type of one member of the uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSlot {
    pub offset: u32,
    pub ty: SlotType,
}

/// Reflected shape of the program's uniform block (set 0, binding 0).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformLayout {
    slots: BTreeMap<String, UniformSlot>,
    resolution: Option<UniformSlot>,
    size: u32,
}

impl UniformLayout {
    pub(crate) fn reflect(module: &naga::Module) -> Option<Self> {
        let (_, global) = module.global_variables.iter().find(|(_, global)| {
            global.space == naga::AddressSpace::Uniform
                && global
                    .binding
                    .as_ref()
                    .is_some_and(|binding| binding.group == 0 && binding.binding == 0)
        })?;
        let naga::TypeInner::Struct { members, span } = &module.types[global.ty].inner else {
            return None;
        };

        let mut layout = Self {
            size: *span,
            ..Self::default()
        };
        for member in members {
            let Some(name) = member.name.as_deref() else {
                continue;
            };
            let Some(ty) = SlotType::from_naga(&module.types[member.ty].inner) else {
                trace!(member = name, "uniform member type not bindable; skipping");
                continue;
            };
            let slot = UniformSlot {
                offset: member.offset,
                ty,
            };
            if name == RESOLUTION_MEMBER || name == "iResolution" {
                layout.resolution = Some(slot);
            } else {
                let key = name.strip_prefix(SETTING_MEMBER_PREFIX).unwrap_or(name);
                layout.slots.insert(key.to_string(), slot);
            }
        }
        Some(layout)
    }

    pub fn slot(&self, name: &str) -> Option<UniformSlot> {
        self.slots.get(name).copied()
    }

    pub fn resolution(&self) -> Option<UniformSlot> {
        self.resolution
    }

    /// Size in bytes of the block, never below [`MIN_BLOCK_SIZE`].
    pub fn size(&self) -> u32 {
        self.size.max(MIN_BLOCK_SIZE)
    }

    /// Number of settable members, `iResolution` excluded.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn with_slot(mut self, name: &str, offset: u32, ty: SlotType) -> Self {
        self.slots.insert(name.to_string(), UniformSlot { offset, ty });
        self.size = self.size.max(offset + 16);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_resolution(mut self, offset: u32) -> Self {
        self.resolution = Some(UniformSlot {
            offset,
            ty: SlotType::Vec3,
        });
        self.size = self.size.max(offset + 16);
        self
    }
}

/// Latest value per uniform name plus the CPU copy of the block.
#[derive(Debug, Clone)]
pub struct UniformBinder {
    layout: UniformLayout,
    values: UniformValues,
    resolution: [f32; 3],
    bytes: Vec<u8>,
}

impl UniformBinder {
    pub fn new(layout: UniformLayout) -> Self {
        let size = layout.size() as usize;
        Self {
            layout,
            values: UniformValues::new(),
            resolution: [0.0, 0.0, 1.0],
            bytes: vec![0; size],
        }
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    /// Stores `value` under `name`, replacing any earlier value.
    pub fn set(&mut self, name: &str, value: UniformValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    pub fn values(&self) -> &UniformValues {
        &self.values
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = [width as f32, height as f32, 1.0];
    }

    pub fn resolution(&self) -> [f32; 3] {
        self.resolution
    }

    /// Writes every stored value the layout knows about into the block and
    /// returns its bytes.
    pub fn pack(&mut self) -> &[u8] {
        if let Some(slot) = self.layout.resolution() {
            let [width, height, depth] = self.resolution;
            write_words(
                &mut self.bytes,
                slot,
                &[width.to_bits(), height.to_bits(), depth.to_bits()],
            );
        }
        for (name, value) in &self.values {
            let Some(slot) = self.layout.slot(name) else {
                trace!(uniform = %name, "uniform not declared by program; skipping");
                continue;
            };
            match encode(value, slot.ty) {
                Some((words, count)) => write_words(&mut self.bytes, slot, &words[..count]),
                None => trace!(
                    uniform = %name,
                    kind = value.kind_name(),
                    declared = ?slot.ty,
                    "uniform kind does not match declaration; skipping"
                ),
            }
        }
        &self.bytes
    }

    /// Packs the block and queues it for upload into `buffer`.
    pub fn apply(&mut self, queue: &wgpu::Queue, buffer: &wgpu::Buffer) {
        queue.write_buffer(buffer, 0, self.pack());
    }
}

fn encode(value: &UniformValue, ty: SlotType) -> Option<([u32; 4], usize)> {
    let mut words = [0u32; 4];
    let count = match (*value, ty) {
        (UniformValue::Boolean(flag), SlotType::Int) => {
            words[0] = u32::from(flag);
            1
        }
        (UniformValue::Integer(value) | UniformValue::Select(value), SlotType::Int) => {
            words[0] = value as u32;
            1
        }
        (UniformValue::Float(value), SlotType::Float) => {
            words[0] = value.to_bits();
            1
        }
        (UniformValue::Offset { x, y }, SlotType::Vec2) => {
            words[..2].copy_from_slice(&[x.to_bits(), y.to_bits()]);
            2
        }
        (UniformValue::Color { r, g, b, .. }, SlotType::Vec3) => {
            words[..3].copy_from_slice(&[r.to_bits(), g.to_bits(), b.to_bits()]);
            3
        }
        (UniformValue::Color { r, g, b, a }, SlotType::Vec4) => {
            words = [r.to_bits(), g.to_bits(), b.to_bits(), a.to_bits()];
            4
        }
        _ => return None,
    };
    Some((words, count))
}

fn write_words(bytes: &mut [u8], slot: UniformSlot, words: &[u32]) {
    let start = slot.offset as usize;
    let end = start + words.len() * 4;
    if let Some(target) = bytes.get_mut(start..end) {
        target.copy_from_slice(bytemuck::cast_slice(words));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_i32(bytes: &[u8], offset: usize) -> i32 {
        i32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn layout() -> UniformLayout {
        UniformLayout::default()
            .with_resolution(0)
            .with_slot("strength", 12, SlotType::Float)
            .with_slot("tint", 16, SlotType::Vec3)
            .with_slot("glow", 32, SlotType::Vec4)
            .with_slot("enabled", 48, SlotType::Int)
            .with_slot("shift", 56, SlotType::Vec2)
    }

    #[test]
    fn packs_resolution_and_values() {
        let mut binder = UniformBinder::new(layout());
        binder.set_resolution(640, 480);
        binder.set("strength", UniformValue::Float(0.75));
        binder.set("enabled", UniformValue::Boolean(true));
        binder.set(
            "shift",
            UniformValue::Offset {
                x: -1.0,
                y: 2.0,
            },
        );
        let bytes = binder.pack().to_vec();
        assert_eq!(read_f32(&bytes, 0), 640.0);
        assert_eq!(read_f32(&bytes, 4), 480.0);
        assert_eq!(read_f32(&bytes, 8), 1.0);
        assert_eq!(read_f32(&bytes, 12), 0.75);
        assert_eq!(read_i32(&bytes, 48), 1);
        assert_eq!(read_f32(&bytes, 56), -1.0);
        assert_eq!(read_f32(&bytes, 60), 2.0);
    }

    #[test]
    fn color_width_follows_declaration() {
        let mut binder = UniformBinder::new(layout());
        let color = UniformValue::Color {
            r: 0.1,
            g: 0.2,
            b: 0.3,
            a: 0.4,
        };
        binder.set("tint", color);
        binder.set("glow", color);
        binder.set("strength", UniformValue::Float(9.0));
        let bytes = binder.pack().to_vec();
        assert_eq!(read_f32(&bytes, 24), 0.3);
        // vec3 leaves the trailing padding word untouched.
        assert_eq!(read_f32(&bytes, 28), 0.0);
        assert_eq!(read_f32(&bytes, 44), 0.4);
    }

    #[test]
    fn undeclared_names_are_stored_but_not_packed() {
        let mut binder = UniformBinder::new(layout());
        let baseline = binder.pack().to_vec();
        binder.set("unknown", UniformValue::Float(5.0));
        assert_eq!(binder.get("unknown"), Some(&UniformValue::Float(5.0)));
        assert_eq!(binder.pack(), baseline.as_slice());
    }

    #[test]
    fn resetting_overwrites_previous_value() {
        let mut binder = UniformBinder::new(layout());
        binder.set("strength", UniformValue::Float(0.1));
        binder.set("strength", UniformValue::Float(0.9));
        assert_eq!(binder.values().len(), 1);
        let bytes = binder.pack().to_vec();
        assert_eq!(read_f32(&bytes, 12), 0.9);
    }

    #[test]
    fn mismatched_kind_is_skipped() {
        let mut binder = UniformBinder::new(layout());
        binder.set("enabled", UniformValue::Float(3.0));
        let bytes = binder.pack().to_vec();
        assert_eq!(read_i32(&bytes, 48), 0);
    }

    #[test]
    fn empty_layout_still_has_a_buffer() {
        let mut binder = UniformBinder::new(UniformLayout::default());
        assert_eq!(binder.pack().len(), MIN_BLOCK_SIZE as usize);
    }
}
