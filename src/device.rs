//! The boundary between the allocator and the device driver.
use alloc::{string::String, vec::Vec};
use core::{fmt, ops};

/// A size or offset in device memory, in bytes.
pub type DeviceSize = u64;

/// A device capable of allocating and freeing raw device memory objects.
///
/// This is the only part of the driver API the allocator calls. Each call is
/// expensive and may block on the driver, which is why memory is obtained in
/// large pools and suballocated.
pub trait MemoryDevice {
    /// A handle to a device memory object (e.g., `VkDeviceMemory`).
    type Memory: Copy + fmt::Debug;

    /// Allocate `size` bytes of the memory type `memory_type_index`.
    ///
    /// `memory_type_index` is always an index into the [`MemoryProperties`]
    /// the allocator was created with.
    fn allocate_memory(
        &self,
        size: DeviceSize,
        memory_type_index: u32,
    ) -> Result<Self::Memory, DeviceError>;

    /// Free a device memory object.
    ///
    /// # Safety
    ///
    ///  - `memory` must have been returned by `self.allocate_memory` and not
    ///    freed yet.
    ///  - No resource may still be bound to `memory`.
    ///
    unsafe fn free_memory(&self, memory: Self::Memory);
}

/// A driver-level failure, carrying the driver's result code (e.g.,
/// `ERROR_OUT_OF_DEVICE_MEMORY`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device memory allocation failed: {code}")]
pub struct DeviceError {
    code: String,
}

impl DeviceError {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// The driver's result code.
    pub fn code(&self) -> &str {
        &self.code
    }
}

/// Memory property flags (`VkMemoryPropertyFlags`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryPropertyFlags(u32);

impl MemoryPropertyFlags {
    pub const DEVICE_LOCAL: Self = Self(0x1);
    pub const HOST_VISIBLE: Self = Self(0x2);
    pub const HOST_COHERENT: Self = Self(0x4);
    pub const HOST_CACHED: Self = Self(0x8);
    pub const LAZILY_ALLOCATED: Self = Self(0x10);
    pub const PROTECTED: Self = Self(0x20);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::DEVICE_LOCAL, "DEVICE_LOCAL"),
        (Self::HOST_VISIBLE, "HOST_VISIBLE"),
        (Self::HOST_COHERENT, "HOST_COHERENT"),
        (Self::HOST_CACHED, "HOST_CACHED"),
        (Self::LAZILY_ALLOCATED, "LAZILY_ALLOCATED"),
        (Self::PROTECTED, "PROTECTED"),
    ];

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Returns `true` if every flag in `other` is also set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for MemoryPropertyFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for MemoryPropertyFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MemoryPropertyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                rest &= !flag.0;
                first = false;
            }
        }
        if rest != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{:#x}", rest)?;
        } else if first {
            f.write_str("(empty)")?;
        }
        Ok(())
    }
}

/// A memory type (`VkMemoryType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

/// A memory heap (`VkMemoryHeap`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeap {
    pub size: DeviceSize,
    pub device_local: bool,
}

/// The memory types and heaps of a physical device
/// (`VkPhysicalDeviceMemoryProperties`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryProperties {
    pub memory_types: Vec<MemoryType>,
    pub memory_heaps: Vec<MemoryHeap>,
}

impl MemoryProperties {
    /// Find the first memory type that is allowed by `memory_type_bits` and
    /// has all of `required` set.
    ///
    /// Drivers list memory types in order of preference, so the first match
    /// is the best one.
    pub fn find_memory_type(
        &self,
        memory_type_bits: u32,
        required: MemoryPropertyFlags,
    ) -> Option<u32> {
        self.memory_types
            .iter()
            .enumerate()
            .take(u32::BITS as usize)
            .find(|(i, ty)| {
                memory_type_bits & (1 << i) != 0 && ty.property_flags.contains(required)
            })
            .map(|(i, _)| i as u32)
    }

    /// Get the heap backing the specified memory type.
    pub fn heap_of(&self, memory_type_index: u32) -> Option<&MemoryHeap> {
        let ty = self.memory_types.get(memory_type_index as usize)?;
        self.memory_heaps.get(ty.heap_index as usize)
    }
}

/// The memory requirements of a resource (`VkMemoryRequirements`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: DeviceSize,
    pub alignment: DeviceSize,
    /// Bit `i` is set iff memory type `i` can back the resource.
    pub memory_type_bits: u32,
}
