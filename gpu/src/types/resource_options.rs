//! Packed resource options.
//!
//! [`ResourceOptions`] stores three independent modes in one `u16`:
//!
//! | field               | shift | width |
//! |---------------------|-------|-------|
//! | CPU cache mode      | 0     | 4     |
//! | storage mode        | 4     | 4     |
//! | hazard tracking     | 8     | 4     |
//!
//! Bits 12..16 are reserved and must be zero.

use std::fmt;
use std::ops::BitOr;

/// CPU mapping behavior of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CpuCacheMode {
    /// Default cached mapping.
    #[default]
    DefaultCache = 0,
    /// Write-combined mapping, for memory the CPU writes but never reads.
    WriteCombined = 1,
}

impl CpuCacheMode {
    /// All cache modes.
    pub const ALL: [Self; 2] = [Self::DefaultCache, Self::WriteCombined];

    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::DefaultCache),
            1 => Some(Self::WriteCombined),
            _ => None,
        }
    }
}

/// Memory location and access permissions of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StorageMode {
    /// System memory visible to both CPU and GPU.
    #[default]
    Shared = 0,
    /// Synchronized CPU and GPU copies; GPU writes become CPU visible after
    /// a blit `synchronize_resource`.
    Managed = 1,
    /// GPU-only memory.
    Private = 2,
    /// Transient on-tile memory, valid only for render attachments.
    Memoryless = 3,
}

impl StorageMode {
    /// All storage modes.
    pub const ALL: [Self; 4] = [Self::Shared, Self::Managed, Self::Private, Self::Memoryless];

    /// Whether the CPU may read and write the resource's memory directly.
    pub fn is_cpu_accessible(self) -> bool {
        matches!(self, Self::Shared | Self::Managed)
    }

    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Shared),
            1 => Some(Self::Managed),
            2 => Some(Self::Private),
            3 => Some(Self::Memoryless),
            _ => None,
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Shared => "shared",
            Self::Managed => "managed",
            Self::Private => "private",
            Self::Memoryless => "memoryless",
        };
        f.write_str(name)
    }
}

/// Whether read/write ordering on a resource is enforced automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum HazardTrackingMode {
    /// Tracked unless the resource lives in a heap.
    #[default]
    Default = 0,
    /// The caller is responsible for ordering.
    Untracked = 1,
    /// Ordering is enforced.
    Tracked = 2,
}

impl HazardTrackingMode {
    /// All hazard tracking modes.
    pub const ALL: [Self; 3] = [Self::Default, Self::Untracked, Self::Tracked];

    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Default),
            1 => Some(Self::Untracked),
            2 => Some(Self::Tracked),
            _ => None,
        }
    }
}

/// Cache mode, storage mode and hazard tracking packed into one value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceOptions(u16);

impl ResourceOptions {
    /// Bit offset of the CPU cache mode field.
    pub const CPU_CACHE_MODE_SHIFT: u32 = 0;
    /// Bit offset of the storage mode field.
    pub const STORAGE_MODE_SHIFT: u32 = 4;
    /// Bit offset of the hazard tracking mode field.
    pub const HAZARD_TRACKING_MODE_SHIFT: u32 = 8;
    /// Width in bits of every field.
    pub const FIELD_WIDTH: u32 = 4;

    const FIELD_MASK: u16 = (1 << Self::FIELD_WIDTH) - 1;
    const USED_BITS: u16 = (1 << (Self::HAZARD_TRACKING_MODE_SHIFT + Self::FIELD_WIDTH)) - 1;

    pub const CPU_CACHE_MODE_DEFAULT_CACHE: Self = Self::encode(
        CpuCacheMode::DefaultCache,
        StorageMode::Shared,
        HazardTrackingMode::Default,
    );
    pub const CPU_CACHE_MODE_WRITE_COMBINED: Self = Self::encode(
        CpuCacheMode::WriteCombined,
        StorageMode::Shared,
        HazardTrackingMode::Default,
    );
    pub const STORAGE_MODE_SHARED: Self = Self::encode(
        CpuCacheMode::DefaultCache,
        StorageMode::Shared,
        HazardTrackingMode::Default,
    );
    pub const STORAGE_MODE_MANAGED: Self = Self::encode(
        CpuCacheMode::DefaultCache,
        StorageMode::Managed,
        HazardTrackingMode::Default,
    );
    pub const STORAGE_MODE_PRIVATE: Self = Self::encode(
        CpuCacheMode::DefaultCache,
        StorageMode::Private,
        HazardTrackingMode::Default,
    );
    pub const STORAGE_MODE_MEMORYLESS: Self = Self::encode(
        CpuCacheMode::DefaultCache,
        StorageMode::Memoryless,
        HazardTrackingMode::Default,
    );
    pub const HAZARD_TRACKING_MODE_UNTRACKED: Self = Self::encode(
        CpuCacheMode::DefaultCache,
        StorageMode::Shared,
        HazardTrackingMode::Untracked,
    );
    pub const HAZARD_TRACKING_MODE_TRACKED: Self = Self::encode(
        CpuCacheMode::DefaultCache,
        StorageMode::Shared,
        HazardTrackingMode::Tracked,
    );

    /// Pack the three modes.
    pub const fn encode(
        cpu_cache_mode: CpuCacheMode,
        storage_mode: StorageMode,
        hazard_tracking_mode: HazardTrackingMode,
    ) -> Self {
        Self(
            ((cpu_cache_mode as u16) << Self::CPU_CACHE_MODE_SHIFT)
                | ((storage_mode as u16) << Self::STORAGE_MODE_SHIFT)
                | ((hazard_tracking_mode as u16) << Self::HAZARD_TRACKING_MODE_SHIFT),
        )
    }

    /// Unpack the three modes. Exact inverse of [`encode`](Self::encode).
    pub fn decode(self) -> (CpuCacheMode, StorageMode, HazardTrackingMode) {
        (
            self.cpu_cache_mode(),
            self.storage_mode(),
            self.hazard_tracking_mode(),
        )
    }

    /// Interpret a raw value.
    ///
    /// Returns `None` when any field holds an unknown value or a reserved bit
    /// is set.
    pub fn from_bits(bits: u16) -> Option<Self> {
        if bits & !Self::USED_BITS != 0 {
            return None;
        }
        CpuCacheMode::from_raw(Self::field(bits, Self::CPU_CACHE_MODE_SHIFT))?;
        StorageMode::from_raw(Self::field(bits, Self::STORAGE_MODE_SHIFT))?;
        HazardTrackingMode::from_raw(Self::field(bits, Self::HAZARD_TRACKING_MODE_SHIFT))?;
        Some(Self(bits))
    }

    /// The raw packed value.
    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn cpu_cache_mode(self) -> CpuCacheMode {
        CpuCacheMode::from_raw(Self::field(self.0, Self::CPU_CACHE_MODE_SHIFT))
            .unwrap_or_else(|| unreachable!("validated on construction"))
    }

    pub fn storage_mode(self) -> StorageMode {
        StorageMode::from_raw(Self::field(self.0, Self::STORAGE_MODE_SHIFT))
            .unwrap_or_else(|| unreachable!("validated on construction"))
    }

    pub fn hazard_tracking_mode(self) -> HazardTrackingMode {
        HazardTrackingMode::from_raw(Self::field(self.0, Self::HAZARD_TRACKING_MODE_SHIFT))
            .unwrap_or_else(|| unreachable!("validated on construction"))
    }

    /// Replace the storage mode, keeping the other fields.
    pub fn with_storage_mode(self, storage_mode: StorageMode) -> Self {
        Self::encode(self.cpu_cache_mode(), storage_mode, self.hazard_tracking_mode())
    }

    /// Replace the CPU cache mode, keeping the other fields.
    pub fn with_cpu_cache_mode(self, cpu_cache_mode: CpuCacheMode) -> Self {
        Self::encode(cpu_cache_mode, self.storage_mode(), self.hazard_tracking_mode())
    }

    /// Replace the hazard tracking mode, keeping the other fields.
    pub fn with_hazard_tracking_mode(self, hazard_tracking_mode: HazardTrackingMode) -> Self {
        Self::encode(self.cpu_cache_mode(), self.storage_mode(), hazard_tracking_mode)
    }

    fn field(bits: u16, shift: u32) -> u16 {
        (bits >> shift) & Self::FIELD_MASK
    }
}

/// Combines option constants field by field. Each field of `rhs` that is not
/// at its default value wins.
impl BitOr for ResourceOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        let (lc, ls, lh) = self.decode();
        let (rc, rs, rh) = rhs.decode();
        Self::encode(
            if rc == CpuCacheMode::default() { lc } else { rc },
            if rs == StorageMode::default() { ls } else { rs },
            if rh == HazardTrackingMode::default() { lh } else { rh },
        )
    }
}

impl From<StorageMode> for ResourceOptions {
    fn from(storage_mode: StorageMode) -> Self {
        Self::default().with_storage_mode(storage_mode)
    }
}

impl fmt::Debug for ResourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceOptions")
            .field("bits", &format_args!("{:#06x}", self.0))
            .field("cpu_cache_mode", &self.cpu_cache_mode())
            .field("storage_mode", &self.storage_mode())
            .field("hazard_tracking_mode", &self.hazard_tracking_mode())
            .finish()
    }
}
