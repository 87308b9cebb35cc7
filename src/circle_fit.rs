//! Least-squares circle fit of an impedance sweep.
//!
//! The points of a sweep trace an arc in the impedance plane. Writing the
//! circle as `x² + y² = z0·x + z1·y + z2` turns the fit into a linear
//! least-squares problem over the rows `[x, y, 1]`, solved through the
//! normal equations.

use std::f64::consts::PI;

/// Fewest points that determine a circle.
pub const MIN_POINTS: usize = 3;

/// Angular step between boundary points.
pub const BOUNDARY_STEP: f64 = PI / 20.0;

/// Boundary points from angle 0 down to -π, both ends included.
pub const BOUNDARY_POINTS: usize = 21;

/// Pivots below this fraction of their column's largest entry count as zero.
const SINGULARITY_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DegenerateInputError {
    #[error("Circle fit needs at least {required} points, got {found}")]
    NotEnoughPoints { found: usize, required: usize },

    #[error("Normal equations are singular (collinear or coincident points)")]
    SingularMatrix,

    #[error("Fit produced a non-finite radius")]
    NonFiniteRadius,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CircleFit {
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
    /// Lower semicircle, sampled clockwise from angle 0.
    pub boundary_points: Vec<Point>,
}

impl CircleFit {
    /// Placeholder used when a sweep cannot be fitted.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.boundary_points.is_empty()
    }

    pub fn center(&self) -> Point {
        Point::new(self.center_x, self.center_y)
    }
}

/// Fit a circle through `points` in the least-squares sense.
pub fn fit(points: &[Point]) -> Result<CircleFit, DegenerateInputError> {
    if points.len() < MIN_POINTS {
        return Err(DegenerateInputError::NotEnoughPoints {
            found: points.len(),
            required: MIN_POINTS,
        });
    }

    // Normal equations (MᵀM) z = Mᵀt with rows [x, y, 1] and targets x² + y².
    let mut normal = [[0.0f64; 3]; 3];
    let mut rhs = [0.0f64; 3];
    for p in points {
        let row = [p.x, p.y, 1.0];
        let target = p.x * p.x + p.y * p.y;
        for i in 0..3 {
            for j in 0..3 {
                normal[i][j] += row[i] * row[j];
            }
            rhs[i] += row[i] * target;
        }
    }

    let z = solve_3x3(normal, rhs)?;

    let center_x = z[0] * 0.5;
    let center_y = z[1] * 0.5;
    let radius = (z[2] + center_x * center_x + center_y * center_y).sqrt();
    if !radius.is_finite() || !center_x.is_finite() || !center_y.is_finite() {
        return Err(DegenerateInputError::NonFiniteRadius);
    }

    Ok(CircleFit {
        center_x,
        center_y,
        radius,
        boundary_points: boundary(center_x, center_y, radius),
    })
}

fn boundary(center_x: f64, center_y: f64, radius: f64) -> Vec<Point> {
    (0..BOUNDARY_POINTS)
        .map(|k| {
            let angle = -(k as f64) * BOUNDARY_STEP;
            Point::new(
                center_x + radius * angle.cos(),
                center_y + radius * angle.sin(),
            )
        })
        .collect()
}

/// Gaussian elimination with partial pivoting.
fn solve_3x3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Result<[f64; 3], DegenerateInputError> {
    let mut column_scale = [0.0f64; 3];
    for (col, scale) in column_scale.iter_mut().enumerate() {
        *scale = a.iter().fold(0.0f64, |m, row| m.max(row[col].abs()));
        if *scale == 0.0 || !scale.is_finite() {
            return Err(DegenerateInputError::SingularMatrix);
        }
    }

    for col in 0..3 {
        let pivot_row = (col..3)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot_row][col].abs() <= column_scale[col] * SINGULARITY_TOLERANCE {
            return Err(DegenerateInputError::SingularMatrix);
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in col + 1..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut z = [0.0f64; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| a[row][k] * z[k]).sum();
        z[row] = (b[row] - tail) / a[row][row];
    }
    Ok(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6;

    fn on_circle(cx: f64, cy: f64, r: f64, angles: &[f64]) -> Vec<Point> {
        angles
            .iter()
            .map(|a| Point::new(cx + r * a.cos(), cy + r * a.sin()))
            .collect()
    }

    #[test]
    fn test_exact_circle() {
        let angles: Vec<f64> = (0..8).map(|k| k as f64 * PI / 4.0).collect();
        let circle = fit(&on_circle(3.0, 4.0, 5.0, &angles)).unwrap();
        assert!((circle.center_x - 3.0).abs() < TOLERANCE);
        assert!((circle.center_y - 4.0).abs() < TOLERANCE);
        assert!((circle.radius - 5.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_three_points_define_circle() {
        let points = [Point::new(8.0, 4.0), Point::new(3.0, 9.0), Point::new(-2.0, 4.0)];
        let circle = fit(&points).unwrap();
        assert!((circle.center_x - 3.0).abs() < TOLERANCE);
        assert!((circle.center_y - 4.0).abs() < TOLERANCE);
        assert!((circle.radius - 5.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_impedance_scale_arc() {
        // A Nyquist-style arc: only the lower half, at kilo-ohm scale.
        let angles: Vec<f64> = (0..16).map(|k| -(k as f64) * PI / 15.0).collect();
        let circle = fit(&on_circle(40_000.0, -2_000.0, 30_000.0, &angles)).unwrap();
        // Normal equations at this scale lose a few digits.
        assert!((circle.center_x - 40_000.0).abs() < 0.5);
        assert!((circle.center_y + 2_000.0).abs() < 0.5);
        assert!((circle.radius - 30_000.0).abs() < 0.5);
    }

    #[test]
    fn test_collinear_points_are_degenerate() {
        let points = [Point::new(0.0, 0.0), Point::new(1.0, 2.0), Point::new(2.0, 4.0)];
        assert_eq!(fit(&points), Err(DegenerateInputError::SingularMatrix));
    }

    #[test]
    fn test_coincident_points_are_degenerate() {
        let points = [Point::new(1.0, 1.0); 5];
        assert_eq!(fit(&points), Err(DegenerateInputError::SingularMatrix));
    }

    #[test]
    fn test_too_few_points() {
        let points = [Point::new(0.0, 0.0), Point::new(1.0, 0.0)];
        assert_eq!(
            fit(&points),
            Err(DegenerateInputError::NotEnoughPoints {
                found: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_boundary_sweeps_lower_semicircle() {
        let angles = [0.0, PI / 2.0, PI, 3.0 * PI / 2.0];
        let circle = fit(&on_circle(0.0, 0.0, 2.0, &angles)).unwrap();

        assert_eq!(circle.boundary_points.len(), BOUNDARY_POINTS);
        let first = circle.boundary_points[0];
        let middle = circle.boundary_points[10];
        let last = circle.boundary_points[BOUNDARY_POINTS - 1];
        assert!((first.x - 2.0).abs() < TOLERANCE && first.y.abs() < TOLERANCE);
        assert!(middle.x.abs() < TOLERANCE && (middle.y + 2.0).abs() < TOLERANCE);
        assert!((last.x + 2.0).abs() < TOLERANCE && last.y.abs() < TOLERANCE);
        assert!(circle.boundary_points.iter().all(|p| p.y <= TOLERANCE));
    }

    #[test]
    fn test_empty_fallback() {
        let circle = CircleFit::empty();
        assert!(circle.is_empty());
        assert_eq!(circle.center(), Point::new(0.0, 0.0));
        assert_eq!(circle.radius, 0.0);
    }
}
