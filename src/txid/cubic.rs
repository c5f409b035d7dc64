//! Numeric helpers reproducing the service's client-side animation math.
//! The exact rounding/truncation behaviour matters: tokens must be
//! byte-identical to what the web app would produce.

/// Cubic Bézier easing curve evaluated by bisection.
pub struct Cubic {
    curves: Vec<f64>,
}

impl Cubic {
    pub fn new(curves: Vec<f64>) -> Self {
        Self { curves }
    }

    pub fn value(&self, t: f64) -> f64 {
        let c = &self.curves;
        let mut start = 0.0;
        let mut mid = 0.0;
        let mut end = 1.0;

        if t <= 0.0 {
            let start_gradient = if c[0] > 0.0 {
                c[1] / c[0]
            } else if c[1] == 0.0 && c[2] > 0.0 {
                c[3] / c[2]
            } else {
                0.0
            };
            return start_gradient * t;
        }

        if t >= 1.0 {
            let end_gradient = if c[2] < 1.0 {
                (c[3] - 1.0) / (c[2] - 1.0)
            } else if c[2] == 1.0 && c[0] < 1.0 {
                (c[1] - 1.0) / (c[0] - 1.0)
            } else {
                0.0
            };
            return 1.0 + end_gradient * (t - 1.0);
        }

        while start < end {
            mid = (start + end) / 2.0;
            let x_est = cubic_calc(c[0], c[2], mid);
            if (t - x_est).abs() < 1e-5 {
                return cubic_calc(c[1], c[3], mid);
            }
            if x_est < t {
                start = mid;
            } else {
                end = mid;
            }
        }
        cubic_calc(c[1], c[3], mid)
    }
}

fn cubic_calc(a: f64, b: f64, m: f64) -> f64 {
    3.0 * a * (1.0 - m) * (1.0 - m) * m + 3.0 * b * (1.0 - m) * m * m + m * m * m
}

/// Linear interpolation between equally-sized vectors.
pub fn interpolate(from: &[f64], to: &[f64], f: f64) -> Vec<f64> {
    from.iter()
        .zip(to)
        .map(|(a, b)| a * (1.0 - f) + b * f)
        .collect()
}

/// 2x2 rotation matrix for the given angle in degrees.
pub fn rotation_matrix(degrees: f64) -> [f64; 4] {
    let rad = degrees.to_radians();
    [rad.cos(), -rad.sin(), rad.sin(), rad.cos()]
}

/// JavaScript `Math.round`: half-away-from-zero for positive halves.
pub fn js_round(num: f64) -> f64 {
    let mut x = num.floor();
    if num - x >= 0.5 {
        x = num.ceil();
    }
    x.copysign(num)
}

/// Curve parameter lower bound: odd-indexed values map from [-1, 1],
/// even-indexed from [0, 1].
pub fn odd_coefficient(idx: usize) -> f64 {
    if idx % 2 != 0 {
        -1.0
    } else {
        0.0
    }
}

/// Hex representation of a non-negative float, reproducing the original
/// digit-extraction loop exactly (including its truncating integer
/// division on a decreasing quotient). Returns an empty string for zero.
pub fn float_to_hex(x: f64) -> String {
    let mut result: Vec<String> = Vec::new();
    let mut quotient = x as i64;
    let fraction = x - quotient as f64;
    let mut x = x;

    while quotient > 0 {
        quotient = (x / 16.0) as i64;
        let remainder = (x - (quotient as f64) * 16.0) as i64;
        if remainder > 9 {
            result.insert(0, char::from((remainder as u8) + 55).to_string());
        } else {
            result.insert(0, remainder.to_string());
        }
        x = quotient as f64;
    }

    if fraction == 0.0 {
        return result.concat();
    }

    result.push(".".to_string());
    let mut fraction = fraction;
    while fraction > 0.0 {
        fraction *= 16.0;
        let integer = fraction as i64;
        fraction -= integer as f64;
        if integer > 9 {
            result.push(char::from((integer as u8) + 55).to_string());
        } else {
            result.push(integer.to_string());
        }
    }

    result.concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubic_endpoints_use_gradients() {
        let c = Cubic::new(vec![0.25, -0.5, 0.25, -0.5]);
        assert_eq!(c.value(0.0), 0.0);
        // gradient -2 extends below zero
        assert!((c.value(-0.5) - 1.0).abs() < 1e-9);
        let linearish = Cubic::new(vec![0.25, 0.25, 0.75, 0.75]);
        let mid = linearish.value(0.5);
        assert!((mid - 0.5).abs() < 1e-3, "linear curve midpoint: {mid}");
    }

    #[test]
    fn interpolate_blends_linearly() {
        assert_eq!(interpolate(&[0.0, 10.0], &[10.0, 20.0], 0.5), vec![5.0, 15.0]);
        assert_eq!(interpolate(&[1.0], &[3.0], 0.0), vec![1.0]);
        assert_eq!(interpolate(&[1.0], &[3.0], 1.0), vec![3.0]);
    }

    #[test]
    fn rotation_matrix_is_orthonormal() {
        let m = rotation_matrix(90.0);
        assert!((m[0]).abs() < 1e-12);
        assert!((m[1] + 1.0).abs() < 1e-12);
        assert!((m[2] - 1.0).abs() < 1e-12);
        assert!((m[3]).abs() < 1e-12);
        assert_eq!(rotation_matrix(0.0), [1.0, -0.0, 0.0, 1.0]);
    }

    #[test]
    fn js_round_is_half_up() {
        assert_eq!(js_round(0.5), 1.0);
        assert_eq!(js_round(0.4), 0.0);
        assert_eq!(js_round(1.5), 2.0);
        assert_eq!(js_round(2.4), 2.0);
    }

    #[test]
    fn float_to_hex_matches_reference_values() {
        assert_eq!(float_to_hex(0.0), "");
        assert_eq!(float_to_hex(1.0), "1");
        assert_eq!(float_to_hex(10.0), "A");
        assert_eq!(float_to_hex(15.0), "F");
        assert_eq!(float_to_hex(16.0), "10");
        assert_eq!(float_to_hex(255.0), "FF");
        assert_eq!(float_to_hex(0.5), ".8");
        assert_eq!(float_to_hex(0.25), ".4");
        assert_eq!(float_to_hex(1.5), "1.8");
    }
}
