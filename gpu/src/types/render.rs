//! Render pass enumerations.

/// Geometric primitive assembled from a run of vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Point,
    Line,
    LineStrip,
    Triangle,
    TriangleStrip,
}

impl PrimitiveType {
    /// Number of complete primitives assembled from `vertex_count` vertices.
    ///
    /// Trailing vertices that do not complete a primitive are dropped: seven
    /// vertices drawn as [`PrimitiveType::Triangle`] produce two triangles.
    pub fn primitive_count(self, vertex_count: usize) -> usize {
        match self {
            Self::Point => vertex_count,
            Self::Line => vertex_count / 2,
            Self::LineStrip => vertex_count.saturating_sub(1),
            Self::Triangle => vertex_count / 3,
            Self::TriangleStrip => vertex_count.saturating_sub(2),
        }
    }

    /// Vertex indices (relative to the draw's first vertex) of primitive `n`.
    ///
    /// Strip triangles alternate their first two vertices so every triangle
    /// keeps the winding of the first one.
    pub fn primitive_vertices(self, n: usize) -> PrimitiveVertices {
        match self {
            Self::Point => PrimitiveVertices::Point(n),
            Self::Line => PrimitiveVertices::Line(2 * n, 2 * n + 1),
            Self::LineStrip => PrimitiveVertices::Line(n, n + 1),
            Self::Triangle => PrimitiveVertices::Triangle(3 * n, 3 * n + 1, 3 * n + 2),
            Self::TriangleStrip if n % 2 == 0 => PrimitiveVertices::Triangle(n, n + 1, n + 2),
            Self::TriangleStrip => PrimitiveVertices::Triangle(n + 1, n, n + 2),
        }
    }
}

/// Vertex indices making up one assembled primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveVertices {
    Point(usize),
    Line(usize, usize),
    Triangle(usize, usize, usize),
}

/// What happens to an attachment's contents when a pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadAction {
    /// Contents are undefined.
    #[default]
    DontCare,
    /// Previous contents are preserved.
    Load,
    /// Every pixel is set to the attachment's clear value.
    Clear,
}

/// What happens to an attachment's contents when a pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreAction {
    /// Rendered contents may be discarded.
    #[default]
    DontCare,
    /// Rendered contents are written back to the texture.
    Store,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_count_truncates() {
        assert_eq!(PrimitiveType::Triangle.primitive_count(3), 1);
        assert_eq!(PrimitiveType::Triangle.primitive_count(7), 2);
        assert_eq!(PrimitiveType::Triangle.primitive_count(2), 0);
        assert_eq!(PrimitiveType::Line.primitive_count(5), 2);
        assert_eq!(PrimitiveType::LineStrip.primitive_count(1), 0);
        assert_eq!(PrimitiveType::LineStrip.primitive_count(4), 3);
        assert_eq!(PrimitiveType::TriangleStrip.primitive_count(5), 3);
        assert_eq!(PrimitiveType::TriangleStrip.primitive_count(0), 0);
        assert_eq!(PrimitiveType::Point.primitive_count(4), 4);
    }

    #[test]
    fn test_strip_winding_alternates() {
        assert_eq!(
            PrimitiveType::TriangleStrip.primitive_vertices(0),
            PrimitiveVertices::Triangle(0, 1, 2)
        );
        assert_eq!(
            PrimitiveType::TriangleStrip.primitive_vertices(1),
            PrimitiveVertices::Triangle(2, 1, 3)
        );
        assert_eq!(
            PrimitiveType::Triangle.primitive_vertices(1),
            PrimitiveVertices::Triangle(3, 4, 5)
        );
    }
}
