//! Cubic smoothing spline (Reinsch).
//!
//! Fits the natural cubic spline `g` that minimizes `∫ g''(x)² dx` subject to
//! `Σ (g(xᵢ) - yᵢ)² ≤ s`. The Lagrange multiplier is found with Newton's
//! method on `F(p)^(-1/2)`, which converges monotonically from `p = 0`.
//!
//! All linear systems are symmetric positive definite pentadiagonal and are
//! solved with a banded LDLᵀ factorization in O(n).

use crate::error::{Result, TrackError};

const MAX_ITERATIONS: usize = 200;
const RELATIVE_TOLERANCE: f64 = 1e-8;

/// A fitted smoothing spline, evaluable anywhere on its knot range.
#[derive(Debug, Clone)]
pub struct SmoothingSpline {
    knots: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl SmoothingSpline {
    /// Fit a smoothing spline through `(x, y)` with smoothing strength `s`.
    ///
    /// `x` must be strictly increasing and hold at least 4 values.
    pub fn fit(x: &[f64], y: &[f64], s: f64) -> Result<Self> {
        let n_points = x.len();
        if n_points < 4 || y.len() != n_points {
            return Err(TrackError::DegenerateRoute {
                distinct_points: n_points,
                length: 0.0,
            });
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        if h.iter().any(|&step| !(step > 0.0) || !step.is_finite()) {
            return Err(TrackError::DegenerateRoute {
                distinct_points: n_points,
                length: x[n_points - 1] - x[0],
            });
        }

        let system = System::new(&h);
        let rhs = system.qt(y);

        // p = 0: straight-line least squares fit
        let mut p = 0.0;
        let mut factor = system.factor(p);
        let mut u = factor.solve(&rhs);
        let mut qu = system.q(&u);
        let mut f = dot(&qu, &qu);

        if f > s {
            for _ in 0..MAX_ITERATIONS {
                if (f - s).abs() <= RELATIVE_TOLERANCE * s {
                    break;
                }

                let tu = system.t(&u);
                let w = factor.solve(&tu);
                let f_prime = -2.0 * (dot(&u, &tu) - p * dot(&tu, &w));
                if !(f_prime < 0.0) {
                    break;
                }

                let step = -2.0 * f * ((f / s).sqrt() - 1.0) / f_prime;
                let mut next = p + step;
                if next < 0.0 {
                    next = p / 2.0;
                }
                if !next.is_finite() || next == p {
                    break;
                }

                p = next;
                factor = system.factor(p);
                u = factor.solve(&rhs);
                qu = system.q(&u);
                f = dot(&qu, &qu);
            }
        }

        let a: Vec<f64> = y.iter().zip(&qu).map(|(yi, qi)| yi - qi).collect();
        let mut c = vec![0.0; n_points];
        for (k, uk) in u.iter().enumerate() {
            c[k + 1] = p * uk;
        }

        let segments = n_points - 1;
        let mut b = Vec::with_capacity(segments);
        let mut d = Vec::with_capacity(segments);
        for i in 0..segments {
            b.push((a[i + 1] - a[i]) / h[i] - h[i] * (2.0 * c[i] + c[i + 1]) / 3.0);
            d.push((c[i + 1] - c[i]) / (3.0 * h[i]));
        }

        Ok(Self {
            knots: x.to_vec(),
            a,
            b,
            c,
            d,
        })
    }

    /// Evaluate the spline at `t`. Outside the knot range the end pieces are extended.
    pub fn eval(&self, t: f64) -> f64 {
        let last = self.knots.len() - 2;
        let i = self
            .knots
            .partition_point(|&k| k <= t)
            .saturating_sub(1)
            .min(last);
        let dx = t - self.knots[i];
        self.a[i] + dx * (self.b[i] + dx * (self.c[i] + dx * self.d[i]))
    }

    /// Fitted values at the knots.
    pub fn fitted(&self) -> &[f64] {
        &self.a
    }
}

/// Band matrices of the smoothing problem for fixed knot spacing.
///
/// `Q` is (n+1)×(n-1) tridiagonal (second divided differences), `T` is the
/// (n-1)×(n-1) tridiagonal spline continuity matrix, `R = QᵀQ` pentadiagonal.
struct System<'a> {
    h: &'a [f64],
    r_diag: Vec<f64>,
    r_off1: Vec<f64>,
    r_off2: Vec<f64>,
    t_diag: Vec<f64>,
    t_off1: Vec<f64>,
}

impl<'a> System<'a> {
    fn new(h: &'a [f64]) -> Self {
        let m = h.len() - 1;
        let inv: Vec<f64> = h.iter().map(|v| 1.0 / v).collect();

        let mut r_diag = Vec::with_capacity(m);
        let mut r_off1 = Vec::with_capacity(m.saturating_sub(1));
        let mut r_off2 = Vec::with_capacity(m.saturating_sub(2));
        let mut t_diag = Vec::with_capacity(m);
        let mut t_off1 = Vec::with_capacity(m.saturating_sub(1));

        // interior knot i = k + 1
        for k in 0..m {
            let i = k + 1;
            let mid = inv[i - 1] + inv[i];
            r_diag.push(inv[i - 1] * inv[i - 1] + mid * mid + inv[i] * inv[i]);
            t_diag.push(2.0 * (h[i - 1] + h[i]) / 3.0);
            if k + 1 < m {
                let next_mid = inv[i] + inv[i + 1];
                r_off1.push(-mid * inv[i] - next_mid * inv[i]);
                t_off1.push(h[i] / 3.0);
            }
            if k + 2 < m {
                r_off2.push(inv[i] * inv[i + 1]);
            }
        }

        Self {
            h,
            r_diag,
            r_off1,
            r_off2,
            t_diag,
            t_off1,
        }
    }

    /// Qᵀ·y, length n-1.
    fn qt(&self, y: &[f64]) -> Vec<f64> {
        (1..self.h.len())
            .map(|i| (y[i + 1] - y[i]) / self.h[i] - (y[i] - y[i - 1]) / self.h[i - 1])
            .collect()
    }

    /// Q·u, length n+1.
    fn q(&self, u: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.h.len() + 1];
        for (k, uk) in u.iter().enumerate() {
            let i = k + 1;
            out[i - 1] += uk / self.h[i - 1];
            out[i] -= uk * (1.0 / self.h[i - 1] + 1.0 / self.h[i]);
            out[i + 1] += uk / self.h[i];
        }
        out
    }

    /// T·u.
    fn t(&self, u: &[f64]) -> Vec<f64> {
        let m = u.len();
        (0..m)
            .map(|k| {
                let mut v = self.t_diag[k] * u[k];
                if k > 0 {
                    v += self.t_off1[k - 1] * u[k - 1];
                }
                if k + 1 < m {
                    v += self.t_off1[k] * u[k + 1];
                }
                v
            })
            .collect()
    }

    /// LDLᵀ factorization of R + p·T.
    fn factor(&self, p: f64) -> Ldl {
        let m = self.r_diag.len();
        let diag: Vec<f64> = (0..m).map(|k| self.r_diag[k] + p * self.t_diag[k]).collect();
        let off1: Vec<f64> = (0..m.saturating_sub(1))
            .map(|k| self.r_off1[k] + p * self.t_off1[k])
            .collect();

        let mut d = vec![0.0; m];
        let mut l1 = vec![0.0; m];
        let mut l2 = vec![0.0; m];
        for i in 0..m {
            let mut di = diag[i];
            if i >= 2 {
                l2[i] = self.r_off2[i - 2] / d[i - 2];
                di -= l2[i] * l2[i] * d[i - 2];
            }
            if i >= 1 {
                let mut f = off1[i - 1];
                if i >= 2 {
                    f -= l2[i] * l1[i - 1] * d[i - 2];
                }
                l1[i] = f / d[i - 1];
                di -= l1[i] * l1[i] * d[i - 1];
            }
            d[i] = di;
        }

        Ldl { d, l1, l2 }
    }
}

/// Banded LDLᵀ factors with unit lower subdiagonals `l1` (i, i-1) and `l2` (i, i-2).
struct Ldl {
    d: Vec<f64>,
    l1: Vec<f64>,
    l2: Vec<f64>,
}

impl Ldl {
    fn solve(&self, b: &[f64]) -> Vec<f64> {
        let m = b.len();
        let mut z = vec![0.0; m];
        for i in 0..m {
            let mut v = b[i];
            if i >= 1 {
                v -= self.l1[i] * z[i - 1];
            }
            if i >= 2 {
                v -= self.l2[i] * z[i - 2];
            }
            z[i] = v;
        }
        for i in 0..m {
            z[i] /= self.d[i];
        }
        for i in (0..m).rev() {
            let mut v = z[i];
            if i + 1 < m {
                v -= self.l1[i + 1] * z[i + 1];
            }
            if i + 2 < m {
                v -= self.l2[i + 2] * z[i + 2];
            }
            z[i] = v;
        }
        z
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
