//! Triangulation of planar polygons by ear clipping.

use cgmath::{InnerSpace, Vector2, Vector3};
use smallvec::{smallvec, SmallVec};


/// Interior angles outside of `(0, π)` mark a vertex that cannot be clipped
/// this round.
const INFEASIBLE: f32 = 10_000.0;

/// Polygons in real PLY files rarely have more than a handful of vertices,
/// so the scratch arrays normally live on the stack.
type Scratch<T> = SmallVec<[T; 16]>;

/// The signed interior angle at `idx`, measured in the 2D projection from
/// the outgoing edge to the incoming edge. Reflex vertices (and degenerate
/// ones) get the infeasible sentinel.
fn angle_at_vert(idx: usize, points: &[Vector2<f32>], prev: &[u32], next: &[u32]) -> f32 {
    let xaxis = (points[next[idx] as usize] - points[idx]).normalize();
    let yaxis = Vector2::new(-xaxis.y, xaxis.x);
    let to_prev = points[prev[idx] as usize] - points[idx];
    let angle = to_prev.dot(yaxis).atan2(to_prev.dot(xaxis));
    if angle <= 0.0 || angle >= std::f32::consts::PI {
        INFEASIBLE
    } else {
        angle
    }
}

/// Triangulates the polygon described by `indices` and writes the resulting
/// triangle indices to `dst`. Returns the number of triangles written.
///
/// `positions` is the flat `x y z` position array of the whole mesh and
/// `num_verts` the number of vertices in it; the polygon's `indices` point
/// into that array. A valid polygon with `n` vertices always produces
/// exactly `n - 2` triangles, so `dst` must have room for `3 * (n - 2)`
/// values.
///
/// Triangles (`n == 3`) are copied through and quads are split on their 0-2
/// diagonal without looking at the positions at all. Larger polygons are ear
/// clipped, repeatedly cutting off the remaining vertex with the sharpest
/// interior angle. The winding of the output triangles follows the winding
/// of the input loop.
///
/// If `n < 3`, or any index is out of range for `num_verts`, nothing is
/// written and 0 is returned.
pub fn triangulate_polygon(
    indices: &[i32],
    positions: &[f32],
    num_verts: u32,
    dst: &mut [i32],
) -> u32 {
    let n = indices.len();
    if n < 3 || dst.len() < 3 * (n - 2) {
        return 0;
    }

    if n == 3 {
        dst[..3].copy_from_slice(indices);
        return 1;
    }

    if n == 4 {
        dst[0] = indices[0];
        dst[1] = indices[1];
        dst[2] = indices[3];

        dst[3] = indices[2];
        dst[4] = indices[3];
        dst[5] = indices[1];
        return 2;
    }

    // Everything below dereferences the indices, so check them up front.
    for &idx in indices {
        if idx < 0 || idx as u32 >= num_verts {
            return 0;
        }
    }
    if positions.len() < num_verts as usize * 3 {
        return 0;
    }

    let vert = |idx: i32| -> Vector3<f32> {
        let base = idx as usize * 3;
        Vector3::new(positions[base], positions[base + 1], positions[base + 2])
    };

    // Build a 2D basis for the face plane from the first, second and last
    // vertex, then project all points onto it.
    let origin = vert(indices[0]);
    let face_u = (vert(indices[1]) - origin).normalize();
    let face_normal = face_u
        .cross((vert(indices[n - 1]) - origin).normalize())
        .normalize();
    let face_v = face_normal.cross(face_u).normalize();

    let mut points: Scratch<Vector2<f32>> = smallvec![Vector2::new(0.0, 0.0); n];
    for i in 1..n {
        let p = vert(indices[i]) - origin;
        points[i] = Vector2::new(p.dot(face_u), p.dot(face_v));
    }

    // A doubly linked cyclic list over the remaining vertices.
    let mut next: Scratch<u32> = smallvec![0; n];
    let mut prev: Scratch<u32> = smallvec![0; n];
    let mut j = n - 1;
    for i in 0..n {
        next[j] = i as u32;
        prev[i] = j as u32;
        j = i;
    }

    let mut first = 0usize;
    let mut remaining = n;
    let mut out = 0usize;
    while remaining > 3 {
        // Find the remaining vertex with the sharpest feasible angle.
        let mut best_i = first;
        let mut best_angle = angle_at_vert(first, &points, &prev, &next);
        let mut i = next[first] as usize;
        while i != first {
            let angle = angle_at_vert(i, &points, &prev, &next);
            if angle < best_angle {
                best_i = i;
                best_angle = angle;
            }
            i = next[i] as usize;
        }

        // Clip the ear at `best_i` and unlink it.
        let next_i = next[best_i] as usize;
        let prev_i = prev[best_i] as usize;

        dst[out] = indices[best_i];
        dst[out + 1] = indices[next_i];
        dst[out + 2] = indices[prev_i];
        out += 3;

        if best_i == first {
            first = next_i;
        }
        next[prev_i] = next_i as u32;
        prev[next_i] = prev_i as u32;
        remaining -= 1;
    }

    dst[out] = indices[first];
    dst[out + 1] = indices[next[first] as usize];
    dst[out + 2] = indices[prev[first] as usize];

    (n - 2) as u32
}


#[cfg(test)]
mod tests {
    use super::*;

    /// Twice the signed area of a 2D polygon given as (x, y) pairs.
    fn shoelace(points: &[[f32; 2]]) -> f32 {
        let mut sum = 0.0;
        for i in 0..points.len() {
            let [x0, y0] = points[i];
            let [x1, y1] = points[(i + 1) % points.len()];
            sum += x0 * y1 - x1 * y0;
        }
        sum
    }

    fn tri_area(positions: &[f32], tri: &[i32]) -> f32 {
        let p = |i: i32| [positions[i as usize * 3], positions[i as usize * 3 + 1]];
        shoelace(&[p(tri[0]), p(tri[1]), p(tri[2])])
    }

    #[test]
    fn degenerate_and_triangle() {
        let mut dst = [0i32; 3];
        assert_eq!(triangulate_polygon(&[0, 1], &[], 8, &mut dst), 0);
        assert_eq!(triangulate_polygon(&[5, 1, 2], &[], 8, &mut dst), 1);
        assert_eq!(dst, [5, 1, 2]);
    }

    #[test]
    fn quad_splits_on_fixed_diagonal() {
        let mut dst = [0i32; 6];
        assert_eq!(triangulate_polygon(&[4, 5, 6, 7], &[], 8, &mut dst), 2);
        assert_eq!(dst, [4, 5, 7, 6, 7, 5]);
    }

    #[test]
    fn out_of_range_indices_abort() {
        let positions = [0.0f32; 15];
        let mut dst = [0i32; 9];
        assert_eq!(triangulate_polygon(&[0, 1, 2, 3, 9], &positions, 5, &mut dst), 0);
        assert_eq!(triangulate_polygon(&[0, 1, -1, 3, 4], &positions, 5, &mut dst), 0);
    }

    #[test]
    fn convex_pentagon() {
        // A regular-ish convex pentagon in the z = 0 plane.
        let positions = [
            0.0, 1.0, 0.0, //
            -0.95, 0.31, 0.0, //
            -0.59, -0.81, 0.0, //
            0.59, -0.81, 0.0, //
            0.95, 0.31, 0.0, //
        ];
        let indices = [0, 1, 2, 3, 4];
        let mut dst = [0i32; 9];
        assert_eq!(triangulate_polygon(&indices, &positions, 5, &mut dst), 3);

        // The triangle fan must cover the polygon exactly: same total area,
        // every triangle wound the same way as the input loop.
        let poly_area = shoelace(&[
            [0.0, 1.0],
            [-0.95, 0.31],
            [-0.59, -0.81],
            [0.59, -0.81],
            [0.95, 0.31],
        ]);
        let mut tri_sum = 0.0;
        for tri in dst.chunks(3) {
            let a = tri_area(&positions, tri);
            assert!((a > 0.0) == (poly_area > 0.0));
            tri_sum += a;
        }
        assert!((tri_sum - poly_area).abs() < 1e-4);
    }

    #[test]
    fn concave_pentagon() {
        // Vertex 4 pokes into the polygon, so no ear may cut across it.
        let positions = [
            0.0, 0.0, 0.0, //
            2.0, 0.0, 0.0, //
            2.0, 2.0, 0.0, //
            0.0, 2.0, 0.0, //
            0.5, 1.0, 0.0, // concave
        ];
        let indices = [0, 1, 2, 3, 4];
        let mut dst = [0i32; 9];
        assert_eq!(triangulate_polygon(&indices, &positions, 5, &mut dst), 3);

        let poly_area = shoelace(&[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.5, 1.0]]);
        let mut tri_sum = 0.0;
        for tri in dst.chunks(3) {
            let a = tri_area(&positions, tri);
            // No degenerate or flipped triangles.
            assert!((a > 0.0) == (poly_area > 0.0));
            tri_sum += a;
        }
        assert!((tri_sum - poly_area).abs() < 1e-4);
    }
}
