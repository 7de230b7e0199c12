//! Least-squares polynomial fits and their minimizers.

use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};
use super::eigen::eigenvalues;

const MAX_SWEEPS: usize = 10_000;
const ROOT_IMAG_TOLERANCE: f64 = 1e-9;

/// Fit `y = Σ c_k x^k` (k = 0..=degree) in the least-squares sense.
///
/// Returns the coefficients in ascending order, or `None` when there are
/// fewer points than coefficients or the design matrix is degenerate.
pub fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Option<DVector<f64>> {
    let n = xs.len();
    if n != ys.len() || n < degree + 1 {
        return None;
    }
    let design = DMatrix::from_fn(n, degree + 1, |r, c| xs[r].powi(c as i32));
    let rhs = DVector::from_column_slice(ys);
    let svd = SVD::try_new(design, true, true, f64::EPSILON, MAX_SWEEPS)?;
    let smax = svd.singular_values.iter().copied().fold(0.0, f64::max);
    let coefs = svd.solve(&rhs, smax * 1e-14).ok()?;
    coefs.iter().all(|c| c.is_finite()).then_some(coefs)
}

/// Evaluate a polynomial with ascending coefficients (Horner).
pub fn polyval(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Vertex of a convex parabola `c0 + c1 x + c2 x²`.
pub fn quadratic_minimum(coefs: &[f64]) -> Option<f64> {
    match coefs {
        [_, c1, c2] if *c2 > 0.0 => Some(-0.5 * c1 / c2),
        _ => None,
    }
}

/// Local minimum of a quartic `c0 + … + c4 x⁴`.
///
/// Critical points are the real roots of the derivative cubic; among those
/// with positive curvature, the lowest one inside `range` wins, falling back
/// to the lowest anywhere.
pub fn quartic_minimum(coefs: &[f64], range: (f64, f64)) -> Option<f64> {
    if coefs.len() != 5 {
        return None;
    }
    let derivative: Vec<f64> = (1..5).map(|k| k as f64 * coefs[k]).collect();
    let curvature: Vec<f64> = (2..5).map(|k| (k * (k - 1)) as f64 * coefs[k]).collect();
    let minima: Vec<f64> = real_roots(&derivative)
        .into_iter()
        .filter(|x| polyval(&curvature, *x) > 0.0)
        .collect();

    let (lo, hi) = range;
    lowest(coefs, minima.iter().copied().filter(|x| *x >= lo && *x <= hi))
        .or_else(|| lowest(coefs, minima.iter().copied()))
}

fn lowest(coefs: &[f64], candidates: impl Iterator<Item = f64>) -> Option<f64> {
    candidates.min_by(|a, b| polyval(coefs, *a).total_cmp(&polyval(coefs, *b)))
}

/// Real roots of a polynomial with ascending coefficients, via the companion matrix.
pub fn real_roots(coefs: &[f64]) -> Vec<f64> {
    let scale = coefs.iter().fold(0.0_f64, |m, c| m.max(c.abs()));
    if scale == 0.0 {
        return Vec::new();
    }
    let degree = match coefs.iter().rposition(|c| c.abs() > 1e-14 * scale) {
        Some(d) => d,
        None => return Vec::new(),
    };
    match degree {
        0 => Vec::new(),
        1 => vec![-coefs[0] / coefs[1]],
        _ => {
            let lead = coefs[degree];
            let companion = DMatrix::from_fn(degree, degree, |r, c| {
                if c == degree - 1 {
                    -coefs[r] / lead
                } else if r == c + 1 {
                    1.0
                } else {
                    0.0
                }
            });
            match eigenvalues(&companion) {
                Ok(roots) => roots
                    .into_iter()
                    .filter(|z| z.im.abs() <= ROOT_IMAG_TOLERANCE * (1.0 + z.re.abs()))
                    .map(|z| z.re)
                    .collect(),
                Err(_) => Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quadratic_through_three_points() {
        let xs = [0.01, 0.1, 1.0];
        let ys = [-4.9, -4.95, -4.7];
        let c = polyfit(&xs, &ys, 2).unwrap();
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert_relative_eq!(polyval(c.as_slice(), *x), *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_quartic_through_five_points() {
        let xs = [0.0, 0.5, 1.0, 1.5, 2.0];
        let ys = [1.0, -0.3, -0.8, -0.2, 0.9];
        let c = polyfit(&xs, &ys, 4).unwrap();
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert_relative_eq!(polyval(c.as_slice(), *x), *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_too_few_points() {
        assert!(polyfit(&[0.0, 1.0], &[1.0, 2.0], 2).is_none());
    }

    #[test]
    fn test_quadratic_minimum() {
        // (x - 2)^2 + 1
        assert_relative_eq!(quadratic_minimum(&[5.0, -4.0, 1.0]).unwrap(), 2.0);
        assert!(quadratic_minimum(&[0.0, 1.0, -1.0]).is_none());
    }

    #[test]
    fn test_quartic_minimum_prefers_range() {
        // (x^2 - 1)^2 + 0.1 x : two wells near ±1, the left one deeper
        let c = [1.0, 0.1, -2.0, 0.0, 1.0];
        let inside = quartic_minimum(&c, (0.0, 2.0)).unwrap();
        assert!(inside > 0.9 && inside < 1.0, "{}", inside);
        let anywhere = quartic_minimum(&c, (5.0, 6.0)).unwrap();
        assert!(anywhere < -1.0 && anywhere > -1.1, "{}", anywhere);
    }

    #[test]
    fn test_real_roots_of_cubic() {
        // (x - 1)(x - 2)(x + 3) = x^3 - 7x + 6
        let mut roots = real_roots(&[6.0, -7.0, 0.0, 1.0]);
        roots.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[0], -3.0, epsilon = 1e-9);
        assert_relative_eq!(roots[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(roots[2], 2.0, epsilon = 1e-9);
    }
}
