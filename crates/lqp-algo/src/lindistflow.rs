//! LinDistFlow voltage sensitivities for radial feeders.
//!
//! Dropping the loss terms from the DistFlow branch equations gives a linear
//! map from nodal injections to squared voltage magnitudes:
//!
//! ```text
//! y = v₀² · 1 + A·p + B·q,    A = 2·Rc,  B = 2·Xc
//! ```
//!
//! where `Rc[j][k]` is the resistance of the lines shared by the slack→j and
//! slack→k paths (likewise `Xc`). Injections are generation positive. The same
//! common-path matrices give the quadratic line-loss estimate
//! `P_loss = (pᵀ Rc p + qᵀ Rc q) / v₀²`, because each line's squared flow
//! is the squared sum of the injections below it.

use lqp_core::{BusId, Network, TopologyError};

/// Dense sensitivity matrices over the non-slack buses, columns in BFS order.
#[derive(Debug, Clone, PartialEq)]
pub struct LinDistFlow {
    columns: Vec<BusId>,
    column_of: Vec<Option<usize>>,
    r_common: Vec<Vec<f64>>,
    x_common: Vec<Vec<f64>>,
    v0_sq: f64,
}

impl LinDistFlow {
    pub fn build(network: &Network) -> Result<Self, TopologyError> {
        let slack = network.slack();
        let columns: Vec<BusId> = network.bfs_order().filter(|&b| b != slack).collect();
        if columns.len() + 1 != network.bus_count() {
            let stranded = network
                .buses()
                .iter()
                .filter(|b| b.id != slack && !columns.contains(&b.id))
                .map(|b| b.name.clone())
                .collect();
            return Err(TopologyError::Unreachable(stranded));
        }

        let mut column_of = vec![None; network.bus_count()];
        for (c, bus) in columns.iter().enumerate() {
            column_of[bus.value()] = Some(c);
        }

        let n = columns.len();
        let mut r_common = vec![vec![0.0; n]; n];
        let mut x_common = vec![vec![0.0; n]; n];

        // BFS order guarantees a parent's row is complete before its children.
        for (c, &bus) in columns.iter().enumerate() {
            let line_id = network
                .bus(bus)
                .parent_line
                .ok_or_else(|| TopologyError::Unreachable(vec![network.bus(bus).name.clone()]))?;
            let line = network.line(line_id);
            if let Some(pc) = column_of[line.from.value()] {
                r_common[c] = r_common[pc].clone();
                x_common[c] = x_common[pc].clone();
            }
            for (k, &other) in columns.iter().enumerate() {
                if network.in_subtree(bus, other) {
                    r_common[c][k] += line.resistance_pu;
                    x_common[c][k] += line.reactance_pu;
                }
            }
        }

        Ok(Self {
            columns,
            column_of,
            r_common,
            x_common,
            v0_sq: network.slack_voltage().squared(),
        })
    }

    /// Non-slack buses in column order.
    pub fn columns(&self) -> &[BusId] {
        &self.columns
    }

    pub fn column(&self, bus: BusId) -> Option<usize> {
        self.column_of.get(bus.value()).copied().flatten()
    }

    pub fn dim(&self) -> usize {
        self.columns.len()
    }

    pub fn slack_voltage_sq(&self) -> f64 {
        self.v0_sq
    }

    #[inline]
    pub fn a(&self, j: usize, k: usize) -> f64 {
        2.0 * self.r_common[j][k]
    }

    #[inline]
    pub fn b(&self, j: usize, k: usize) -> f64 {
        2.0 * self.x_common[j][k]
    }

    pub fn r_common(&self, j: usize, k: usize) -> f64 {
        self.r_common[j][k]
    }

    pub fn x_common(&self, j: usize, k: usize) -> f64 {
        self.x_common[j][k]
    }

    pub fn a_matrix(&self) -> Vec<Vec<f64>> {
        self.r_common
            .iter()
            .map(|row| row.iter().map(|v| 2.0 * v).collect())
            .collect()
    }

    pub fn b_matrix(&self) -> Vec<Vec<f64>> {
        self.x_common
            .iter()
            .map(|row| row.iter().map(|v| 2.0 * v).collect())
            .collect()
    }

    fn to_columns(&self, arena: &[f64]) -> Vec<f64> {
        self.columns.iter().map(|b| arena[b.value()]).collect()
    }

    /// Squared voltage magnitudes for arena-indexed injections (p.u.,
    /// generation positive). The slack entry is `v₀²`.
    pub fn squared_voltages(&self, p: &[f64], q: &[f64]) -> Vec<f64> {
        let pc = self.to_columns(p);
        let qc = self.to_columns(q);
        let mut y = vec![self.v0_sq; self.column_of.len()];
        for (j, bus) in self.columns.iter().enumerate() {
            let mut acc = self.v0_sq;
            for k in 0..self.dim() {
                acc += self.a(j, k) * pc[k] + self.b(j, k) * qc[k];
            }
            y[bus.value()] = acc;
        }
        y
    }

    /// Voltage magnitudes, `sqrt(max(y, 0))`.
    pub fn voltages(&self, p: &[f64], q: &[f64]) -> Vec<f64> {
        self.squared_voltages(p, q)
            .into_iter()
            .map(|y| y.max(0.0).sqrt())
            .collect()
    }

    /// Quadratic estimate of active and reactive line losses (p.u.).
    pub fn losses(&self, p: &[f64], q: &[f64]) -> (f64, f64) {
        let pc = self.to_columns(p);
        let qc = self.to_columns(q);
        let quad = |m: &[Vec<f64>], v: &[f64]| -> f64 {
            m.iter()
                .zip(v)
                .map(|(row, vj)| vj * row.iter().zip(v).map(|(m, vk)| m * vk).sum::<f64>())
                .sum()
        };
        let p_loss = (quad(&self.r_common, &pc) + quad(&self.r_common, &qc)) / self.v0_sq;
        let q_loss = (quad(&self.x_common, &pc) + quad(&self.x_common, &qc)) / self.v0_sq;
        (p_loss, q_loss)
    }

    /// Slack-bus injection balancing the feeder: `−Σ injections + losses`.
    pub fn slack_injection(&self, p: &[f64], q: &[f64]) -> (f64, f64) {
        let (p_loss, q_loss) = self.losses(p, q);
        let p_sum: f64 = self.to_columns(p).iter().sum();
        let q_sum: f64 = self.to_columns(q).iter().sum();
        (-p_sum + p_loss, -q_sum + q_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lqp_core::*;

    /// sub - 1 - 2, and 1 - 3
    fn feeder() -> Network {
        NetworkBuilder::new(
            "t",
            SystemBase::new(KilovoltAmperes(1000.0), Kilovolts(4.16)),
            "sub",
        )
        .bus(BusSpec::new("sub"))
        .bus(BusSpec::new("1"))
        .bus(BusSpec::new("2"))
        .bus(BusSpec::new("3"))
        .line(LineSpec::new("sub", "1", 0.01, 0.02))
        .line(LineSpec::new("1", "2", 0.03, 0.04))
        .line(LineSpec::new("3", "1", 0.05, 0.06))
        .build()
        .unwrap()
    }

    #[test]
    fn common_path_resistance() {
        let net = feeder();
        let ldf = LinDistFlow::build(&net).unwrap();
        let c = |name: &str| ldf.column(net.bus_by_name(name).unwrap()).unwrap();
        let (b1, b2, b3) = (c("1"), c("2"), c("3"));

        assert!((ldf.r_common(b2, b2) - 0.04).abs() < 1e-15);
        assert!((ldf.r_common(b2, b3) - 0.01).abs() < 1e-15);
        assert!((ldf.r_common(b3, b1) - 0.01).abs() < 1e-15);
        assert!((ldf.a(b3, b3) - 0.12).abs() < 1e-15);
        assert!((ldf.b(b2, b2) - 0.12).abs() < 1e-15);
        assert!(ldf.column(net.slack()).is_none());
    }

    #[test]
    fn matrices_are_symmetric_and_deterministic() {
        let net = feeder();
        let first = LinDistFlow::build(&net).unwrap();
        let second = LinDistFlow::build(&net).unwrap();
        assert_eq!(first.a_matrix(), second.a_matrix());
        assert_eq!(first.b_matrix(), second.b_matrix());
        let a = first.a_matrix();
        for j in 0..a.len() {
            for k in 0..a.len() {
                assert_eq!(a[j][k], a[k][j]);
            }
        }
    }

    #[test]
    fn zero_injection_is_flat() {
        let net = feeder();
        let ldf = LinDistFlow::build(&net).unwrap();
        let zeros = vec![0.0; net.bus_count()];
        assert!(ldf.voltages(&zeros, &zeros).iter().all(|&v| v == 1.0));
        assert_eq!(ldf.losses(&zeros, &zeros), (0.0, 0.0));
    }

    #[test]
    fn single_line_drop_and_losses() {
        let net = NetworkBuilder::new(
            "one",
            SystemBase::new(KilovoltAmperes(1000.0), Kilovolts(4.16)),
            "s",
        )
        .bus(BusSpec::new("s"))
        .bus(BusSpec::new("l"))
        .line(LineSpec::new("s", "l", 0.02, 0.04))
        .build()
        .unwrap();
        let ldf = LinDistFlow::build(&net).unwrap();
        let l = net.bus_by_name("l").unwrap().value();
        let mut p = vec![0.0; 2];
        let mut q = vec![0.0; 2];
        p[l] = -0.5;
        q[l] = -0.2;
        let y = ldf.squared_voltages(&p, &q);
        // 1 - 2*0.02*0.5 - 2*0.04*0.2
        assert!((y[l] - 0.964).abs() < 1e-12);
        let (pl, ql) = ldf.losses(&p, &q);
        assert!((pl - 0.02 * 0.29).abs() < 1e-12);
        assert!((ql - 0.04 * 0.29).abs() < 1e-12);
        let (ps, _) = ldf.slack_injection(&p, &q);
        assert!((ps - (0.5 + 0.0058)).abs() < 1e-12);
    }
}
