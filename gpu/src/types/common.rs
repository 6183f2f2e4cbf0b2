//! Common value types shared across the GPU layer.

// ============================================================================
// Origin / Size / Region
// ============================================================================

/// A position in pixel or thread space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Origin {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Origin {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Dimensions of a pixel region, a dispatch grid or a threadgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// A `width x 1 x 1` size.
    pub const fn new_1d(width: u32) -> Self {
        Self::new(width, 1, 1)
    }

    /// A `width x height x 1` size.
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self::new(width, height, 1)
    }

    /// Number of elements covered (`width * height * depth`).
    pub fn volume(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    /// Whether any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

/// A rectangular volume: an origin plus a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub origin: Origin,
    pub size: Size,
}

impl Region {
    pub const fn new(origin: Origin, size: Size) -> Self {
        Self { origin, size }
    }

    /// A 2D region with depth one.
    pub const fn make_2d(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            origin: Origin::new(x, y, 0),
            size: Size::new(width, height, 1),
        }
    }

    pub const fn make_3d(x: u32, y: u32, z: u32, width: u32, height: u32, depth: u32) -> Self {
        Self {
            origin: Origin::new(x, y, z),
            size: Size::new(width, height, depth),
        }
    }

    /// Whether this region lies inside an extent of `bounds`.
    pub fn fits_within(&self, bounds: Size) -> bool {
        let end = |start: u32, len: u32| start as u64 + len as u64;
        end(self.origin.x, self.size.width) <= bounds.width as u64
            && end(self.origin.y, self.size.height) <= bounds.height as u64
            && end(self.origin.z, self.size.depth) <= bounds.depth as u64
    }
}

// ============================================================================
// ClearColor
// ============================================================================

/// An RGBA clear value for color attachments.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl ClearColor {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// The color as single precision `[r, g, b, a]`.
    pub fn to_array(self) -> [f32; 4] {
        [
            self.red as f32,
            self.green as f32,
            self.blue as f32,
            self.alpha as f32,
        ]
    }
}
