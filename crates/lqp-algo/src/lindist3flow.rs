//! LinDist3Flow: unbalanced three-phase linearized power flow.
//!
//! A backward sweep sums complex per-phase power from the leaves to the root;
//! a forward sweep then propagates squared voltages down the tree:
//!
//! ```text
//! Y_child = Y_parent + M_p · P_line + M_q · Q_line
//! ```
//!
//! The `M` matrices fold the 120° phase displacement into the mutual
//! impedance terms (Sankur et al., "A Linearized Power Flow Model for
//! Optimization in Unbalanced Distribution Systems").

use lqp_core::three_phase::{PhaseMatrix, PhaseVector, ThreePhaseFeeder};
use num_complex::Complex64;

const SQRT3: f64 = 1.732_050_807_568_877_2;

/// `(M_p, M_q)` for one line's per-unit `R`, `X`.
pub fn m_matrices(r: &PhaseMatrix, x: &PhaseMatrix) -> (PhaseMatrix, PhaseMatrix) {
    let mut mp = [[0.0; 3]; 3];
    let mut mq = [[0.0; 3]; 3];
    for i in 0..3 {
        mp[i][i] = -2.0 * r[i][i];
        mq[i][i] = -2.0 * x[i][i];
    }

    mp[0][1] = r[0][1] - SQRT3 * x[0][1];
    mp[0][2] = r[0][2] + SQRT3 * x[0][2];
    mq[0][1] = x[0][1] + SQRT3 * r[0][1];
    mq[0][2] = x[0][2] - SQRT3 * r[0][2];

    mp[1][0] = r[1][0] + SQRT3 * x[1][0];
    mp[1][2] = r[1][2] - SQRT3 * x[1][2];
    mq[1][0] = x[1][0] - SQRT3 * r[1][0];
    mq[1][2] = x[1][2] + SQRT3 * r[1][2];

    mp[2][0] = r[2][0] - SQRT3 * x[2][0];
    mp[2][1] = r[2][1] + SQRT3 * x[2][1];
    mq[2][0] = x[2][0] + SQRT3 * r[2][0];
    mq[2][1] = x[2][1] - SQRT3 * r[2][1];

    (mp, mq)
}

fn mat_vec(m: &PhaseMatrix, v: &PhaseVector) -> PhaseVector {
    let mut out = [0.0; 3];
    for i in 0..3 {
        out[i] = m[i][0] * v[0] + m[i][1] * v[1] + m[i][2] * v[2];
    }
    out
}

/// Per-node results of a sweep.
#[derive(Debug, Clone)]
pub struct ThreePhaseResult {
    /// Squared voltage magnitude per node and phase.
    pub squared: Vec<PhaseVector>,
    /// Voltage magnitude, `sqrt(max(Y, 0))`.
    pub voltage: Vec<PhaseVector>,
    /// Complex power entering each node from its parent (p.u.).
    pub flow: Vec<[Complex64; 3]>,
}

impl ThreePhaseResult {
    pub fn min_voltage(&self) -> f64 {
        self.voltage
            .iter()
            .flat_map(|v| v.iter().copied())
            .fold(f64::INFINITY, f64::min)
    }
}

/// Sweep solver bound to one feeder; `M` matrices are computed once.
#[derive(Debug, Clone)]
pub struct LinDist3Flow<'a> {
    feeder: &'a ThreePhaseFeeder,
    m: Vec<Option<(PhaseMatrix, PhaseMatrix)>>,
}

impl<'a> LinDist3Flow<'a> {
    pub fn new(feeder: &'a ThreePhaseFeeder) -> Self {
        let m = (0..feeder.nodes().len())
            .map(|node| feeder.line_into(node).map(|l| m_matrices(&l.r, &l.x)))
            .collect();
        Self { feeder, m }
    }

    /// Sweep with the feeder's own loads and a balanced 1.0 p.u. root.
    pub fn solve(&self) -> ThreePhaseResult {
        let n = self.feeder.nodes().len();
        let p: Vec<PhaseVector> = (0..n).map(|i| self.feeder.load_p(i)).collect();
        let q: Vec<PhaseVector> = (0..n).map(|i| self.feeder.load_q(i)).collect();
        self.solve_with(&p, &q, [1.0; 3])
    }

    /// Sweep for explicit per-node loads (p.u., consumption positive).
    pub fn solve_with(
        &self,
        load_p: &[PhaseVector],
        load_q: &[PhaseVector],
        root_voltage: PhaseVector,
    ) -> ThreePhaseResult {
        let tree = self.feeder.tree();
        let n = self.feeder.nodes().len();

        let mut flow = vec![[Complex64::new(0.0, 0.0); 3]; n];
        for &node in tree.order.iter().rev() {
            for ph in 0..3 {
                flow[node][ph] += Complex64::new(load_p[node][ph], load_q[node][ph]);
            }
            if let Some(parent) = tree.parent[node] {
                let child = flow[node];
                for ph in 0..3 {
                    flow[parent][ph] += child[ph];
                }
            }
        }

        let mut squared = vec![[0.0; 3]; n];
        squared[self.feeder.root()] = root_voltage.map(|v| v * v);
        for &node in &tree.order {
            let (Some(parent), Some((mp, mq))) = (tree.parent[node], &self.m[node]) else {
                continue;
            };
            let pk = flow[node].map(|s| s.re);
            let qk = flow[node].map(|s| s.im);
            let dp = mat_vec(mp, &pk);
            let dq = mat_vec(mq, &qk);
            for ph in 0..3 {
                squared[node][ph] = squared[parent][ph] + dp[ph] + dq[ph];
            }
        }

        let voltage = squared
            .iter()
            .map(|y| y.map(|v| v.max(0.0).sqrt()))
            .collect();
        ThreePhaseResult {
            squared,
            voltage,
            flow,
        }
    }
}
