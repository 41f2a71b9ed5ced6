//! Backend-neutral convex QP with conic constraints.
//!
//! ```text
//! minimize    ½ xᵀ P x + qᵀ x + c
//! subject to  A x + s = b,   s ∈ K
//! ```
//!
//! `K` is a product of zero cones (equalities), nonnegative cones
//! (inequalities) and second-order cones. Constraint coefficients are
//! accumulated column-wise, the layout CSC conversion wants.

mod backend;
pub mod clarabel;

pub use backend::{QpBackend, QpError, QpSettings, QpSolution, QpStatus};
pub use self::clarabel::ClarabelBackend;

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cone {
    Zero(usize),
    Nonnegative(usize),
    SecondOrder(usize),
}

#[derive(Debug, Clone, Default)]
pub struct QpProblem {
    n_var: usize,
    /// Upper-triangular entries of `P`, keyed `(col, row)` so iteration is
    /// already CSC-ordered.
    p_upper: BTreeMap<(usize, usize), f64>,
    q: Vec<f64>,
    constant: f64,
    columns: Vec<Vec<(usize, f64)>>,
    rhs: Vec<f64>,
    cones: Vec<Cone>,
}

impl QpProblem {
    pub fn new(n_var: usize) -> Self {
        Self {
            n_var,
            p_upper: BTreeMap::new(),
            q: vec![0.0; n_var],
            constant: 0.0,
            columns: vec![Vec::new(); n_var],
            rhs: Vec::new(),
            cones: Vec::new(),
        }
    }

    pub fn n_var(&self) -> usize {
        self.n_var
    }

    pub fn n_rows(&self) -> usize {
        self.rhs.len()
    }

    pub fn cones(&self) -> &[Cone] {
        &self.cones
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    pub fn linear(&self) -> &[f64] {
        &self.q
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    /// Add `coeff · x_i · x_j` to the objective.
    pub fn add_quadratic(&mut self, i: usize, j: usize, coeff: f64) {
        if coeff == 0.0 {
            return;
        }
        let (row, col) = if i <= j { (i, j) } else { (j, i) };
        let scale = if i == j { 2.0 } else { 1.0 };
        *self.p_upper.entry((col, row)).or_insert(0.0) += scale * coeff;
    }

    /// Add `coeff · x_i` to the objective.
    pub fn add_linear(&mut self, i: usize, coeff: f64) {
        self.q[i] += coeff;
    }

    pub fn add_constant(&mut self, c: f64) {
        self.constant += c;
    }

    fn push_row(&mut self, coeffs: &[(usize, f64)], b: f64) -> usize {
        let row = self.rhs.len();
        for &(col, val) in coeffs {
            if val != 0.0 {
                self.columns[col].push((row, val));
            }
        }
        self.rhs.push(b);
        row
    }

    /// `Σ coeffᵢ·xᵢ = b`
    pub fn push_eq(&mut self, coeffs: &[(usize, f64)], b: f64) -> usize {
        let row = self.push_row(coeffs, b);
        match self.cones.last_mut() {
            Some(Cone::Zero(n)) => *n += 1,
            _ => self.cones.push(Cone::Zero(1)),
        }
        row
    }

    /// `Σ coeffᵢ·xᵢ ≤ b`
    pub fn push_leq(&mut self, coeffs: &[(usize, f64)], b: f64) -> usize {
        let row = self.push_row(coeffs, b);
        match self.cones.last_mut() {
            Some(Cone::Nonnegative(n)) => *n += 1,
            _ => self.cones.push(Cone::Nonnegative(1)),
        }
        row
    }

    /// `lo ≤ x_i ≤ hi`
    pub fn push_bounds(&mut self, i: usize, lo: f64, hi: f64) {
        self.push_leq(&[(i, -1.0)], -lo);
        self.push_leq(&[(i, 1.0)], hi);
    }

    /// `‖(g₁·x, …, gₖ·x)‖₂ ≤ radius` for a constant radius. Returns the
    /// first row of the cone.
    pub fn push_soc(&mut self, radius: f64, tail: &[&[(usize, f64)]]) -> usize {
        // s = b - A x: head row is the constant radius, tail rows negate g
        // so that s_k = g_k · x.
        let first = self.push_row(&[], radius);
        for g in tail {
            let negated: Vec<(usize, f64)> = g.iter().map(|&(c, v)| (c, -v)).collect();
            self.push_row(&negated, 0.0);
        }
        self.cones.push(Cone::SecondOrder(tail.len() + 1));
        first
    }

    /// `P` as `(col_ptr, row_idx, values)`, upper triangle.
    pub fn p_csc(&self) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        let mut col_ptr = Vec::with_capacity(self.n_var + 1);
        let mut row_idx = Vec::with_capacity(self.p_upper.len());
        let mut values = Vec::with_capacity(self.p_upper.len());
        let mut entries = self.p_upper.iter().peekable();
        for col in 0..self.n_var {
            col_ptr.push(row_idx.len());
            while let Some((&(c, r), &v)) = entries.peek() {
                if c != col {
                    break;
                }
                row_idx.push(r);
                values.push(v);
                entries.next();
            }
        }
        col_ptr.push(row_idx.len());
        (col_ptr, row_idx, values)
    }

    /// `A` as `(col_ptr, row_idx, values)`.
    pub fn a_csc(&self) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        let mut col_ptr = Vec::with_capacity(self.n_var + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        for column in &self.columns {
            col_ptr.push(row_idx.len());
            let mut sorted = column.clone();
            sorted.sort_by_key(|&(r, _)| r);
            for (r, v) in sorted {
                row_idx.push(r);
                values.push(v);
            }
        }
        col_ptr.push(row_idx.len());
        (col_ptr, row_idx, values)
    }

    /// Objective value at `x`, including the constant term.
    pub fn objective(&self, x: &[f64]) -> f64 {
        let mut value = self.constant;
        for (i, qi) in self.q.iter().enumerate() {
            value += qi * x[i];
        }
        for (&(col, row), &v) in &self.p_upper {
            if col == row {
                value += 0.5 * v * x[row] * x[col];
            } else {
                value += v * x[row] * x[col];
            }
        }
        value
    }

    /// `b − A x`, the cone slack at `x`.
    pub fn slack(&self, x: &[f64]) -> Vec<f64> {
        let mut s = self.rhs.clone();
        for (col, column) in self.columns.iter().enumerate() {
            for &(row, v) in column {
                s[row] -= v * x[col];
            }
        }
        s
    }

    /// Largest cone violation of `x`.
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let s = self.slack(x);
        let mut worst: f64 = 0.0;
        let mut row = 0;
        for cone in &self.cones {
            match *cone {
                Cone::Zero(n) => {
                    for v in &s[row..row + n] {
                        worst = worst.max(v.abs());
                    }
                    row += n;
                }
                Cone::Nonnegative(n) => {
                    for v in &s[row..row + n] {
                        worst = worst.max(-v);
                    }
                    row += n;
                }
                Cone::SecondOrder(n) => {
                    let tail: f64 = s[row + 1..row + n].iter().map(|v| v * v).sum::<f64>().sqrt();
                    worst = worst.max(tail - s[row]);
                    row += n;
                }
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cones_merge_like_rows() {
        let mut qp = QpProblem::new(2);
        qp.push_eq(&[(0, 1.0)], 1.0);
        qp.push_eq(&[(1, 1.0)], 2.0);
        qp.push_leq(&[(0, 1.0)], 3.0);
        qp.push_bounds(1, 0.0, 1.0);
        qp.push_soc(1.0, &[&[(0, 1.0)], &[(1, 1.0)]]);
        qp.push_eq(&[(0, 1.0), (1, -1.0)], 0.0);
        assert_eq!(
            qp.cones(),
            &[
                Cone::Zero(2),
                Cone::Nonnegative(3),
                Cone::SecondOrder(3),
                Cone::Zero(1)
            ]
        );
        assert_eq!(qp.n_rows(), 9);
    }

    #[test]
    fn quadratic_terms_fold_into_upper_triangle() {
        let mut qp = QpProblem::new(2);
        // x0² + 3 x0 x1 + 2 x1²
        qp.add_quadratic(0, 0, 1.0);
        qp.add_quadratic(1, 0, 1.5);
        qp.add_quadratic(0, 1, 1.5);
        qp.add_quadratic(1, 1, 2.0);
        qp.add_linear(0, 1.0);
        qp.add_constant(0.5);
        let (col_ptr, row_idx, values) = qp.p_csc();
        assert_eq!(col_ptr, vec![0, 1, 3]);
        assert_eq!(row_idx, vec![0, 0, 1]);
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        // 1 + 3 + 2 + 1 + 0.5
        assert!((qp.objective(&[1.0, 1.0]) - 7.5).abs() < 1e-12);
    }

    #[test]
    fn a_is_column_sorted() {
        let mut qp = QpProblem::new(2);
        qp.push_leq(&[(1, 2.0)], 1.0);
        qp.push_eq(&[(0, 1.0), (1, 1.0)], 0.0);
        let (col_ptr, row_idx, values) = qp.a_csc();
        assert_eq!(col_ptr, vec![0, 1, 3]);
        assert_eq!(row_idx, vec![1, 0, 1]);
        assert_eq!(values, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn violation_measures_each_cone() {
        let mut qp = QpProblem::new(2);
        qp.push_eq(&[(0, 1.0)], 1.0);
        qp.push_leq(&[(1, 1.0)], 0.5);
        qp.push_soc(1.0, &[&[(0, 1.0)], &[(1, 1.0)]]);
        assert!(qp.max_violation(&[1.0, 0.0]) < 1e-12);
        assert!((qp.max_violation(&[1.0, 0.75]) - 0.25).abs() < 1e-12);
        // ‖(2, 0)‖ − 1, dominated by the equality miss of 1
        assert!((qp.max_violation(&[2.0, 0.0]) - 1.0).abs() < 1e-12);
    }
}
