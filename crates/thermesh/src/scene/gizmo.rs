use bytemuck::{Pod, Zeroable};

const SEGMENTS: u32 = 12;
const SHAFT_LENGTH: f32 = 0.8;
const SHAFT_RADIUS: f32 = 0.015;
const TIP_RADIUS: f32 = 0.06;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GizmoVertex {
    pub position: [f32; 3],
    pub color: [u8; 4],
}

/// Geometry of the translation gizmo, one arrow per axis coloured X red, Y green, Z blue.
#[derive(Debug, Clone, Default)]
pub struct Gizmo {
    pub vertices: Vec<GizmoVertex>,
    pub indices: Vec<u32>,
}

impl Gizmo {
    pub fn translation() -> Self {
        let mut gizmo = Self::default();

        for axis in 0..3 {
            let mut color = [0, 0, 0, 255];
            color[axis] = 255;

            gizmo.push_frustum(axis, color, 0.0, SHAFT_LENGTH, SHAFT_RADIUS, SHAFT_RADIUS);
            gizmo.push_frustum(axis, color, SHAFT_LENGTH, 1.0, TIP_RADIUS, 0.0);
        }

        gizmo
    }

    /// Pushes the side of a cone frustum along `axis` from `start` to `end`.
    fn push_frustum(
        &mut self,
        axis: usize,
        color: [u8; 4],
        start: f32,
        end: f32,
        start_radius: f32,
        end_radius: f32,
    ) {
        let base = self.vertices.len() as u32;

        for (distance, radius) in [(start, start_radius), (end, end_radius)] {
            for segment in 0..SEGMENTS {
                let angle = segment as f32 / SEGMENTS as f32 * core::f32::consts::TAU;

                let mut position = [0.0; 3];
                position[axis] = distance;
                position[(axis + 1) % 3] = angle.cos() * radius;
                position[(axis + 2) % 3] = angle.sin() * radius;

                self.vertices.push(GizmoVertex { position, color });
            }
        }

        for segment in 0..SEGMENTS {
            let next = (segment + 1) % SEGMENTS;

            let a = base + segment;
            let b = base + next;
            let c = base + SEGMENTS + segment;
            let d = base + SEGMENTS + next;

            self.indices.extend_from_slice(&[a, b, c, b, d, c]);
        }
    }
}
