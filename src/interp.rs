//! Grid generation, linear interpolation and quadrature helpers shared by
//! the band integration, order merging and cross-correlation code.

/// Behavior of [`Interp1d::eval`] outside the grid domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    /// Return the nearest endpoint value.
    Clamp,
    /// Return a fixed value.
    Value(f64),
}

/// Piecewise-linear interpolant over a monotonically increasing grid.
///
/// Borrows both arrays; evaluation is a binary search plus one lerp.
/// Zero-width segments (repeated grid values) return the left sample.
pub struct Interp1d<'a> {
    xs: &'a [f64],
    ys: &'a [f64],
    fill: Fill,
}

impl<'a> Interp1d<'a> {
    /// `xs` must be sorted ascending and the same length as `ys`.
    pub fn new(xs: &'a [f64], ys: &'a [f64], fill: Fill) -> Self {
        let n = xs.len().min(ys.len());
        Self {
            xs: &xs[..n],
            ys: &ys[..n],
            fill,
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if n == 0 {
            return match self.fill {
                Fill::Clamp => f64::NAN,
                Fill::Value(v) => v,
            };
        }
        if x < self.xs[0] {
            return match self.fill {
                Fill::Clamp => self.ys[0],
                Fill::Value(v) => v,
            };
        }
        if x > self.xs[n - 1] {
            return match self.fill {
                Fill::Clamp => self.ys[n - 1],
                Fill::Value(v) => v,
            };
        }
        // First index with xs[hi] > x, so xs[hi-1] <= x.
        let hi = self.xs.partition_point(|&v| v <= x);
        if hi == n {
            return self.ys[n - 1];
        }
        let lo = hi - 1;
        let dx = self.xs[hi] - self.xs[lo];
        if dx <= 0.0 {
            return self.ys[lo];
        }
        let t = (x - self.xs[lo]) / dx;
        self.ys[lo] + t * (self.ys[hi] - self.ys[lo])
    }

    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }
}

/// `n` evenly spaced values covering `[start, stop]` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut out: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            out[n - 1] = stop;
            out
        }
    }
}

/// Values `start, start + step, ...` up to but excluding `stop`.
///
/// The length is `ceil((stop - start) / step)`, so `stop` itself is never
/// included even when it falls exactly on the grid.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let span = (stop - start) / step;
    if !span.is_finite() || span <= 0.0 {
        return Vec::new();
    }
    let n = span.ceil() as usize;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Trapezoid-rule integral of samples `y` over abscissae `x`.
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    let n = y.len().min(x.len());
    let mut acc = 0.0;
    for i in 1..n {
        acc += 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]);
    }
    acc
}

/// Median of a slice; even lengths average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n.is_multiple_of(2) {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Index of the sample nearest `target` in a sorted grid.
///
/// Targets outside the grid clamp to the first or last index; equidistant
/// targets take the left neighbor.
pub fn nearest_index(xs: &[f64], target: f64) -> usize {
    if xs.is_empty() {
        return 0;
    }
    let hi = xs.partition_point(|&v| v < target);
    if hi == 0 {
        return 0;
    }
    if hi == xs.len() {
        return xs.len() - 1;
    }
    let lo = hi - 1;
    if target - xs[lo] <= xs[hi] - target { lo } else { hi }
}

/// Index of the smallest value; ties take the first occurrence.
pub fn argmin(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, bv)) if v < bv => best = Some((i, v)),
            None => best = Some((i, v)),
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() < tol,
            "expected {a} ~= {b} (diff = {})",
            (a - b).abs()
        );
    }

    #[test]
    fn linspace_endpoints() {
        let xs = linspace(1.0, 2.0, 11);
        assert_eq!(xs.len(), 11);
        assert_eq!(xs[0], 1.0);
        assert_eq!(xs[10], 2.0);
        assert_close(xs[5], 1.5, 1e-12);

        assert_eq!(linspace(3.0, 7.0, 1), vec![3.0]);
        assert!(linspace(3.0, 7.0, 0).is_empty());
    }

    #[test]
    fn arange_excludes_stop() {
        let xs = arange(0.0, 1.0, 0.25);
        assert_eq!(xs.len(), 4);
        assert_close(xs[3], 0.75, 1e-12);

        let xs = arange(-300.0, 300.0, 0.1);
        assert_eq!(xs.len(), 6000);
        assert_close(xs[0], -300.0, 1e-12);
        assert_close(xs[5999], 299.9, 1e-9);

        assert!(arange(1.0, 1.0, 0.1).is_empty());
        assert!(arange(2.0, 1.0, 0.1).is_empty());
    }

    #[test]
    fn interp_hits_nodes_and_midpoints() {
        let xs = [0.0, 1.0, 2.0, 4.0];
        let ys = [10.0, 20.0, 30.0, 50.0];
        let f = Interp1d::new(&xs, &ys, Fill::Clamp);
        assert_eq!(f.eval(0.0), 10.0);
        assert_eq!(f.eval(2.0), 30.0);
        assert_eq!(f.eval(4.0), 50.0);
        assert_close(f.eval(0.5), 15.0, 1e-12);
        assert_close(f.eval(3.0), 40.0, 1e-12);
    }

    #[test]
    fn interp_out_of_domain() {
        let xs = [1.0, 2.0];
        let ys = [5.0, 6.0];
        let clamp = Interp1d::new(&xs, &ys, Fill::Clamp);
        assert_eq!(clamp.eval(0.0), 5.0);
        assert_eq!(clamp.eval(3.0), 6.0);

        let zero = Interp1d::new(&xs, &ys, Fill::Value(0.0));
        assert_eq!(zero.eval(0.0), 0.0);
        assert_eq!(zero.eval(3.0), 0.0);
        assert_eq!(zero.eval(1.5), 5.5);
    }

    #[test]
    fn interp_tolerates_repeated_nodes() {
        let xs = [0.0, 1.0, 1.0, 2.0];
        let ys = [0.0, 10.0, 10.0, 20.0];
        let f = Interp1d::new(&xs, &ys, Fill::Clamp);
        assert_eq!(f.eval(1.0), 10.0);
        assert_close(f.eval(1.5), 15.0, 1e-12);
    }

    #[test]
    fn trapezoid_rule() {
        let x = linspace(0.0, 1.0, 101);
        let ones = vec![1.0; 101];
        assert_close(trapezoid(&ones, &x), 1.0, 1e-12);

        // Integral of y = x over [0, 2] is 2.
        let x = linspace(0.0, 2.0, 201);
        let y: Vec<f64> = x.clone();
        assert_close(trapezoid(&y, &x), 2.0, 1e-10);

        assert_eq!(trapezoid(&[1.0], &[0.0]), 0.0);
        assert_eq!(trapezoid(&[], &[]), 0.0);
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[7.0]), 7.0);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn nearest_index_clamps_to_bounds() {
        let xs = [10.0, 11.0, 12.0, 13.0];
        assert_eq!(nearest_index(&xs, 5.0), 0);
        assert_eq!(nearest_index(&xs, 50.0), 3);
        assert_eq!(nearest_index(&xs, 11.0), 1);
        assert_eq!(nearest_index(&xs, 11.4), 1);
        assert_eq!(nearest_index(&xs, 11.6), 2);
        // Equidistant targets take the left pixel.
        assert_eq!(nearest_index(&xs, 11.5), 1);
    }

    #[test]
    fn argmin_first_tie() {
        assert_eq!(argmin(&[3.0, 1.0, 1.0, 2.0]), Some(1));
        assert_eq!(argmin(&[5.0]), Some(0));
        assert_eq!(argmin(&[]), None);
    }
}
