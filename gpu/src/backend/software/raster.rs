//! Primitive rasterization on the CPU.
//!
//! Clip-space positions map to the full extent of the target level with
//! `y` pointing down. Primitives are not clipped; triangles with a vertex
//! at or behind the eye (`w <= 0`) are skipped. Fragments write color
//! attachment 0 directly, without blending or depth testing.

use std::sync::Arc;

use super::bindings::ShaderResources;
use super::format::{encode_color, fill_color};
use super::native::{FragmentContext, FragmentFn, VertexContext, VertexOutput};
use crate::backend::GpuRenderPipeline;
use crate::command::{ColorTarget, DrawCommand, RenderPass};
use crate::error::GpuError;
use crate::resources::memory::PixelLayout;
use crate::types::{LoadAction, PixelFormat, PrimitiveVertices};

/// A vertex after the viewport transform.
#[derive(Debug, Clone)]
struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
    varyings: Vec<f32>,
}

impl ScreenVertex {
    fn project(output: VertexOutput, width: f32, height: f32) -> Self {
        let [x, y, z, w] = output.position;
        let inv_w = if w != 0.0 { 1.0 / w } else { 0.0 };
        Self {
            x: (x * inv_w + 1.0) * 0.5 * width,
            y: (1.0 - y * inv_w) * 0.5 * height,
            z: z * inv_w,
            inv_w,
            varyings: output.varyings,
        }
    }
}

/// Pixels of one color target, borrowed for the length of a draw.
struct Target<'a> {
    format: PixelFormat,
    layout: PixelLayout,
    texels: &'a mut [u8],
}

impl Target<'_> {
    fn write(&mut self, x: u32, y: u32, color: [f32; 4]) {
        let offset = self.layout.offset(x, y, 0);
        encode_color(self.format, color, &mut self.texels[offset..]);
    }
}

pub(super) fn execute_render_pass(pass: &RenderPass) -> Result<(), GpuError> {
    for target in pass.color_targets.iter().flatten() {
        if target.load_action == LoadAction::Clear {
            clear_target(target);
        }
    }

    for draw in &pass.draws {
        execute_draw(pass, draw)?;
    }
    Ok(())
}

fn clear_target(target: &ColorTarget) {
    let (index, _) = target.texture.subresource(target.level, target.slice);
    let mut subresources = target.texture.subresources().write();
    fill_color(
        target.texture.pixel_format(),
        target.clear_color.to_array(),
        subresources[index].bytes_mut(),
    );
}

fn execute_draw(pass: &RenderPass, draw: &DrawCommand) -> Result<(), GpuError> {
    let (vertex, fragment) = match draw.pipeline.gpu() {
        GpuRenderPipeline::Software { vertex, fragment } => (vertex, fragment),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(GpuError::Internal(
                "render pipeline was not created by the software backend".to_string(),
            ));
        }
    };

    let primitives = draw.primitive_type.primitive_count(draw.vertex_count);
    log::trace!(
        "SoftwareBackend: draw {:?} vertices {}..{} ({} primitives)",
        draw.primitive_type,
        draw.vertex_start,
        draw.vertex_start + draw.vertex_count,
        primitives
    );

    let Some(fragment) = fragment else {
        return Ok(());
    };
    let Some(target) = pass.color_targets[0].as_ref() else {
        return Ok(());
    };
    if primitives == 0 {
        return Ok(());
    }

    let (index, layout) = target.texture.subresource(target.level, target.slice);
    let width = layout.extent.width as f32;
    let height = layout.extent.height as f32;

    // Vertex phase locks only the vertex bindings.
    let vertices: Vec<ScreenVertex> = {
        let mut ctx = VertexContext {
            vertex_id: 0,
            resources: ShaderResources::lock(&draw.vertex_bindings),
        };
        (draw.vertex_start..draw.vertex_start + draw.vertex_count)
            .map(|vertex_id| {
                ctx.vertex_id = vertex_id as u32;
                ScreenVertex::project(vertex(&mut ctx), width, height)
            })
            .collect()
    };

    let mut subresources = target.texture.subresources().write();
    let mut target = Target {
        format: target.texture.pixel_format(),
        layout,
        texels: subresources[index].bytes_mut(),
    };
    let mut rasterizer = Rasterizer {
        fragment,
        ctx: FragmentContext {
            position: [0.0; 4],
            front_facing: true,
            varyings: Vec::new(),
            resources: ShaderResources::lock(&draw.fragment_bindings),
        },
    };

    for n in 0..primitives {
        match draw.primitive_type.primitive_vertices(n) {
            PrimitiveVertices::Point(a) => rasterizer.point(&vertices[a], &mut target),
            PrimitiveVertices::Line(a, b) => {
                rasterizer.line(&vertices[a], &vertices[b], &mut target)
            }
            PrimitiveVertices::Triangle(a, b, c) => {
                rasterizer.triangle([&vertices[a], &vertices[b], &vertices[c]], &mut target)
            }
        }
    }
    Ok(())
}

struct Rasterizer<'a> {
    fragment: &'a Arc<FragmentFn>,
    ctx: FragmentContext<'a>,
}

impl Rasterizer<'_> {
    /// Shade pixel `(x, y)` with perspective-correct varyings built from
    /// screen-space weights.
    fn shade(
        &mut self,
        x: u32,
        y: u32,
        vertices: &[&ScreenVertex],
        weights: &[f32],
        target: &mut Target<'_>,
    ) {
        let inv_w: f32 = vertices.iter().zip(weights).map(|(v, w)| v.inv_w * w).sum();
        let z: f32 = vertices.iter().zip(weights).map(|(v, w)| v.z * w).sum();

        let count = vertices[0].varyings.len();
        self.ctx.varyings.clear();
        self.ctx.varyings.resize(count, 0.0);
        if inv_w != 0.0 {
            for (vertex, weight) in vertices.iter().zip(weights) {
                let scale = weight * vertex.inv_w / inv_w;
                for (out, value) in self.ctx.varyings.iter_mut().zip(&vertex.varyings) {
                    *out += value * scale;
                }
            }
        }

        self.ctx.position = [x as f32 + 0.5, y as f32 + 0.5, z, inv_w];
        let color = (self.fragment)(&mut self.ctx);
        target.write(x, y, color);
    }

    fn in_bounds(x: f32, y: f32, target: &Target<'_>) -> Option<(u32, u32)> {
        let (px, py) = (x.floor(), y.floor());
        let extent = target.layout.extent;
        (px >= 0.0 && py >= 0.0 && px < extent.width as f32 && py < extent.height as f32)
            .then_some((px as u32, py as u32))
    }

    fn point(&mut self, v: &ScreenVertex, target: &mut Target<'_>) {
        if let Some((x, y)) = Self::in_bounds(v.x, v.y, target) {
            self.ctx.front_facing = true;
            self.shade(x, y, &[v], &[1.0], target);
        }
    }

    fn line(&mut self, a: &ScreenVertex, b: &ScreenVertex, target: &mut Target<'_>) {
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as u32;
        self.ctx.front_facing = true;
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            if let Some((x, y)) = Self::in_bounds(a.x + dx * t, a.y + dy * t, target) {
                self.shade(x, y, &[a, b], &[1.0 - t, t], target);
            }
        }
    }

    fn triangle(&mut self, v: [&ScreenVertex; 3], target: &mut Target<'_>) {
        if v.iter().any(|vertex| vertex.inv_w <= 0.0) {
            return;
        }
        let area = edge(v[0], v[1], v[2].x, v[2].y);
        if area == 0.0 {
            return;
        }
        // Screen y is flipped, so counter-clockwise in clip space is negative here.
        self.ctx.front_facing = area < 0.0;
        let (v, area) = if area < 0.0 {
            ([v[0], v[2], v[1]], -area)
        } else {
            (v, area)
        };

        let extent = target.layout.extent;
        let min_x = v.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
        let min_y = v.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
        let max_x = v
            .iter()
            .map(|p| p.x)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min(extent.width as f32) as u32;
        let max_y = v
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min(extent.height as f32) as u32;

        for y in min_y..max_y {
            for x in min_x..max_x {
                if let Some(weights) = coverage(v, area, x as f32 + 0.5, y as f32 + 0.5) {
                    self.shade(x, y, &v, &weights, target);
                }
            }
        }
    }
}

/// Barycentric weights of the sample `(px, py)` if it lies inside the
/// triangle. `v` must be ordered so that `area` is positive.
///
/// Samples exactly on an edge belong to the triangle only when the edge is a
/// top or left edge, so triangles sharing an edge never shade a pixel twice.
fn coverage(v: [&ScreenVertex; 3], area: f32, px: f32, py: f32) -> Option<[f32; 3]> {
    let edges = [(v[1], v[2]), (v[2], v[0]), (v[0], v[1])];
    let mut weights = [0.0; 3];
    for (weight, (a, b)) in weights.iter_mut().zip(edges) {
        let w = edge(a, b, px, py);
        if w < 0.0 || (w == 0.0 && !is_top_left(a, b)) {
            return None;
        }
        *weight = w / area;
    }
    Some(weights)
}

/// With y pointing down and positive area, top edges run in +x along a
/// constant y and left edges run upwards.
fn is_top_left(a: &ScreenVertex, b: &ScreenVertex) -> bool {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

/// Twice the signed area of `(a, b, p)`.
fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}
