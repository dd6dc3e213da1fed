//! Fixed, little-endian wire types for setup exchanges.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::{align_of, size_of};

use crate::mesh_error::AssemblerError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a received byte buffer into records, copying so that the source
/// alignment does not matter.
pub fn decode_records<T: Pod>(neighbor: usize, bytes: &[u8]) -> Result<Vec<T>, AssemblerError> {
    let sz = size_of::<T>();
    if sz == 0 || bytes.len() % sz != 0 {
        return Err(AssemblerError::BufferSizeMismatch {
            neighbor,
            expected: bytes.len().next_multiple_of(sz.max(1)),
            got: bytes.len(),
        });
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A global node id carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireNode {
    pub id_le: u64,
}
impl WireNode {
    pub fn of(id: usize) -> Self {
        Self {
            id_le: (id as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.id_le) as usize
    }
}

/// Old and new global number of one node, sent by its owner after reordering.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireRenumber {
    pub old_le: u64,
    pub new_le: u64,
}
impl WireRenumber {
    pub fn new(old: usize, new: usize) -> Self {
        Self {
            old_le: (old as u64).to_le(),
            new_le: (new as u64).to_le(),
        }
    }
    pub fn old(&self) -> usize {
        u64::from_le(self.old_le) as usize
    }
    pub fn new_id(&self) -> usize {
        u64::from_le(self.new_le) as usize
    }
}

/// Header of one boundary-condition record; followed on the wire by
/// `count` prescribed values (`f64`, little-endian) in a separate buffer.
/// NOTE: `mask_le` is u32 (never usize) on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireBc {
    pub node_le: u64,
    pub mask_le: u32,
    pub _pad: u32, // pad to 8-byte alignment (explicit)
}
impl WireBc {
    pub const SIZE: usize = 16;
    pub fn new(node: usize, mask: u32) -> Self {
        Self {
            node_le: (node as u64).to_le(),
            mask_le: mask.to_le(),
            _pad: 0,
        }
    }
    pub fn decode(&self) -> (usize, u32) {
        (u64::from_le(self.node_le) as usize, u32::from_le(self.mask_le))
    }
}

/// An `f64` carried as its little-endian bit pattern.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireScalar {
    pub bits_le: u64,
}
impl WireScalar {
    pub fn of(v: f64) -> Self {
        Self {
            bits_le: v.to_bits().to_le(),
        }
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

// ===== Compile-time sanity checks =========================================

const_assert_eq!(size_of::<WireCount>(), 8);
const_assert_eq!(size_of::<WireNode>(), 8);
const_assert_eq!(size_of::<WireRenumber>(), 16);
const_assert_eq!(size_of::<WireBc>(), WireBc::SIZE);
const_assert_eq!(align_of::<WireBc>(), 8);
const_assert_eq!(size_of::<WireScalar>(), 8);
