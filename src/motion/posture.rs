// Body posture engine
//
// Computes body-frame foot targets for a roll/pitch/yaw/height pose, and
// projects body-frame points into each leg's hip frame.

use crate::config::{BODY_ANCHORS, LEG_COUNT, LEG_MOUNT_ANGLES, LEG_MOUNT_OFFSETS, LEG_MOUNT_Z};

/// A point in millimetres
pub type Point = [f64; 3];

type Matrix3 = [[f64; 3]; 3];

/// Body-frame foot anchors at the given body height
pub fn body_points(body_height: f64) -> [Point; LEG_COUNT] {
    BODY_ANCHORS.map(|[x, y]| [x, y, body_height])
}

/// Foot targets for a tilted body
///
/// # Arguments
/// * `roll`, `pitch`, `yaw` - Body attitude in degrees
/// * `body_height` - Z offset applied after rotation
///
/// The rotation is composed as `Rx(pitch) * Ry(roll) * Rz(yaw)`; the feet
/// are ordered the same way as the legs.
pub fn calculate_posture_balance(
    roll: f64,
    pitch: f64,
    yaw: f64,
    body_height: f64,
) -> [Point; LEG_COUNT] {
    let (roll, pitch, yaw) = (roll.to_radians(), pitch.to_radians(), yaw.to_radians());

    let rotation_x = [
        [1.0, 0.0, 0.0],
        [0.0, pitch.cos(), -pitch.sin()],
        [0.0, pitch.sin(), pitch.cos()],
    ];
    let rotation_y = [
        [roll.cos(), 0.0, -roll.sin()],
        [0.0, 1.0, 0.0],
        [roll.sin(), 0.0, roll.cos()],
    ];
    let rotation_z = [
        [yaw.cos(), -yaw.sin(), 0.0],
        [yaw.sin(), yaw.cos(), 0.0],
        [0.0, 0.0, 1.0],
    ];
    let rotation = mat_mul(&mat_mul(&rotation_x, &rotation_y), &rotation_z);

    BODY_ANCHORS.map(|[x, y]| {
        let [fx, fy, fz] = mat_vec(&rotation, [x, y, 0.0]);
        [fx, fy, fz + body_height]
    })
}

/// Project body-frame points into each leg's hip frame
pub fn transform_coordinates(points: &[Point; LEG_COUNT]) -> [Point; LEG_COUNT] {
    let mut legs = [[0.0; 3]; LEG_COUNT];
    for (i, leg) in legs.iter_mut().enumerate() {
        *leg = to_leg_frame(i, points[i]);
    }
    legs
}

/// Rotate by the leg's mount angle and shift to its hip
fn to_leg_frame(leg: usize, [x, y, z]: Point) -> Point {
    let angle = LEG_MOUNT_ANGLES[leg].to_radians();
    let (sin, cos) = angle.sin_cos();
    [
        x * cos + y * sin - LEG_MOUNT_OFFSETS[leg],
        -x * sin + y * cos,
        z - LEG_MOUNT_Z,
    ]
}

/// Euclidean distance of a leg-local point from its hip
pub fn leg_length(point: &Point) -> f64 {
    point.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn mat_mul(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn mat_vec(m: &Matrix3, v: Point) -> Point {
    m.map(|row| row[0] * v[0] + row[1] * v[1] + row[2] * v[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }

    #[test]
    fn test_level_posture_is_anchors_at_height() {
        let points = calculate_posture_balance(0.0, 0.0, 0.0, -25.0);
        let expected = body_points(-25.0);
        for (p, e) in points.iter().zip(expected.iter()) {
            for k in 0..3 {
                assert_close(p[k], e[k]);
            }
        }
    }

    #[test]
    fn test_neutral_body_maps_to_neutral_stance() {
        let legs = transform_coordinates(&body_points(-25.0));
        for leg in &legs {
            // Every hip sees its foot ~140mm out, 39mm below
            assert!((leg[0] - 140.0).abs() < 0.5, "{:?}", leg);
            assert!(leg[1].abs() < 0.5, "{:?}", leg);
            assert_close(leg[2], -39.0);
        }
    }

    #[test]
    fn test_mount_offsets_are_asymmetric() {
        // Middle legs sit closer to the center than the corner legs
        let legs = transform_coordinates(&body_points(0.0));
        assert_close(legs[1][0], 225.0 - 85.0);
        assert_close(legs[4][0], 225.0 - 85.0);
    }

    #[test]
    fn test_yaw_rotates_about_z() {
        let points = calculate_posture_balance(0.0, 0.0, 90.0, 0.0);
        // Leg 1 anchor (225, 0) swings onto the +y axis
        assert_close(points[1][0], 0.0);
        assert_close(points[1][1], 225.0);
        assert_close(points[1][2], 0.0);
    }

    #[test]
    fn test_composition_order_is_pitch_roll_yaw() {
        // Compose by hand: Rx(pitch) * (Ry(roll) * (Rz(yaw) * v))
        let (roll, pitch, yaw) = (10.0f64, -7.0f64, 12.0f64);
        let points = calculate_posture_balance(roll, pitch, yaw, 0.0);

        let [x, y] = BODY_ANCHORS[0];
        let (r, p, w) = (roll.to_radians(), pitch.to_radians(), yaw.to_radians());
        let (x1, y1, z1) = (x * w.cos() - y * w.sin(), x * w.sin() + y * w.cos(), 0.0);
        let (x2, y2, z2) = (x1 * r.cos() - z1 * r.sin(), y1, x1 * r.sin() + z1 * r.cos());
        let (x3, y3, z3) = (x2, y2 * p.cos() - z2 * p.sin(), y2 * p.sin() + z2 * p.cos());

        assert_close(points[0][0], x3);
        assert_close(points[0][1], y3);
        assert_close(points[0][2], z3);
    }

    #[test]
    fn test_tilt_limits_stay_reachable() {
        for roll in [-15.0, 0.0, 15.0] {
            for pitch in [-15.0, 0.0, 15.0] {
                for yaw in [-15.0, 0.0, 15.0] {
                    let legs = transform_coordinates(&calculate_posture_balance(
                        roll, pitch, yaw, -25.0,
                    ));
                    for leg in &legs {
                        let length = leg_length(leg);
                        assert!((90.0..=248.0).contains(&length), "{length}");
                    }
                }
            }
        }
    }
}
