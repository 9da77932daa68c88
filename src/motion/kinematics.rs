// Leg inverse/forward kinematics for the 3-joint hexapod leg
// Converts leg-local foot coordinates into hip/knee/ankle angles in degrees.

use crate::config::LINK_LENGTHS;

/// Convert a leg-local foot position to joint angles (degrees)
///
/// # Arguments
/// * `x` - Height of the foot below the hip (positive = down)
/// * `y` - Reach along the leg's mount direction
/// * `z` - Lateral offset across the mount direction
///
/// Returns `(hip, knee, ankle)` rounded to whole degrees
pub fn coordinate_to_angle(x: f64, y: f64, z: f64) -> (i32, i32, i32) {
    let (l1, l2, l3) = LINK_LENGTHS;
    coordinate_to_angle_with_links(x, y, z, l1, l2, l3)
}

/// Convert a foot position to joint angles with custom link lengths
///
/// Every ratio handed to `asin`/`acos` is clamped to [-1, 1] first, so an
/// unreachable target yields a saturated angle instead of NaN.
pub fn coordinate_to_angle_with_links(
    x: f64,
    y: f64,
    z: f64,
    l1: f64,
    l2: f64,
    l3: f64,
) -> (i32, i32, i32) {
    let (x, y, z) = (finite_or_zero(x), finite_or_zero(y), finite_or_zero(z));

    // Hip yaw, then the knee pivot it carries
    let a = std::f64::consts::FRAC_PI_2 - z.atan2(y);
    let knee_y = l1 * a.sin();
    let knee_z = l1 * a.cos();

    // Knee-to-foot distance; a coincident foot is nudged off the pivot
    let l23 = ((z - knee_z).powi(2) + (y - knee_y).powi(2) + x.powi(2))
        .sqrt()
        .max(f64::EPSILON);

    let w = unit_ratio(x / l23);
    let v = unit_ratio((l2 * l2 + l23 * l23 - l3 * l3) / (2.0 * l2 * l23));
    let u = unit_ratio((l2 * l2 + l3 * l3 - l23 * l23) / (2.0 * l3 * l2));

    let b = round_to(w, 2).asin() - round_to(v, 2).acos();
    let c = std::f64::consts::PI - round_to(u, 2).acos();

    (to_whole_degrees(a), to_whole_degrees(b), to_whole_degrees(c))
}

/// Forward kinematics, the inverse of [`coordinate_to_angle`]
pub fn angle_to_coordinate(a: i32, b: i32, c: i32) -> (i32, i32, i32) {
    let (l1, l2, l3) = LINK_LENGTHS;
    angle_to_coordinate_with_links(a, b, c, l1, l2, l3)
}

/// Forward kinematics with custom link lengths
pub fn angle_to_coordinate_with_links(
    a: i32,
    b: i32,
    c: i32,
    l1: f64,
    l2: f64,
    l3: f64,
) -> (i32, i32, i32) {
    let a = f64::from(a).to_radians();
    let b = f64::from(b).to_radians();
    let c = f64::from(c).to_radians();

    // Planar reach of the knee/ankle chain, then projected by hip yaw
    let reach = l3 * (b + c).cos() + l2 * b.cos() + l1;
    let x = l3 * (b + c).sin() + l2 * b.sin();
    let y = a.sin() * reach;
    let z = a.cos() * reach;

    (
        x.round_ties_even() as i32,
        y.round_ties_even() as i32,
        z.round_ties_even() as i32,
    )
}

/// Clamp a value into [min, max]
pub fn restrict_value<T: PartialOrd>(value: T, min: T, max: T) -> T {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Linearly map `value` from one range onto another
///
/// A degenerate source range maps everything to `to_low`.
pub fn map_value(value: f64, from_low: f64, from_high: f64, to_low: f64, to_high: f64) -> f64 {
    if from_high == from_low {
        return to_low;
    }
    (to_high - to_low) * (value - from_low) / (from_high - from_low) + to_low
}

/// Clamp a trig argument into [-1, 1]; NaN collapses to 0
fn unit_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        0.0
    } else {
        restrict_value(ratio, -1.0, 1.0)
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

fn to_whole_degrees(radians: f64) -> i32 {
    radians.to_degrees().round_ties_even() as i32
}
