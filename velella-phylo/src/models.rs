//! Nucleotide substitution models: JC69 and HKY85 transition probabilities.

use velella_core::{Result, VelellaError};

/// Number of nucleotide states.
pub const NUM_STATES: usize = 4;

/// Map a nucleotide byte to its state index (A=0, C=1, G=2, T=3).
///
/// Returns `None` for gaps and ambiguity codes, which are treated as
/// missing data by the likelihood machinery.
pub fn nucleotide_index(b: u8) -> Option<usize> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' | b'U' | b'u' => Some(3),
        _ => None,
    }
}

/// JC69 transition probability matrix for branch length `t`
/// (expected substitutions per site).
pub fn jc69_probability(t: f64) -> [[f64; 4]; 4] {
    let e = (-4.0 * t / 3.0).exp();
    let same = 0.25 + 0.75 * e;
    let diff = 0.25 - 0.25 * e;
    let mut p = [[diff; 4]; 4];
    for (i, row) in p.iter_mut().enumerate() {
        row[i] = same;
    }
    p
}

/// HKY85 substitution model: transition/transversion rate ratio `kappa`
/// over background frequencies, normalized to one expected substitution
/// per site per unit branch length.
#[derive(Debug, Clone)]
pub struct Hky85 {
    pub kappa: f64,
    pub freqs: [f64; 4],
    /// Scaled transition rate.
    alpha: f64,
    /// Scaled transversion rate.
    beta: f64,
}

impl Hky85 {
    pub fn new(kappa: f64, freqs: [f64; 4]) -> Result<Self> {
        if kappa <= 0.0 {
            return Err(VelellaError::InvalidInput(format!(
                "kappa must be positive, got {kappa}"
            )));
        }
        let sum: f64 = freqs.iter().sum();
        if freqs.iter().any(|&f| f <= 0.0) || (sum - 1.0).abs() > 1e-6 {
            return Err(VelellaError::InvalidInput(
                "background frequencies must be positive and sum to 1".into(),
            ));
        }
        let [pa, pc, pg, pt] = freqs;
        let purines = pa + pg;
        let pyrimidines = pc + pt;
        // Mean substitution rate, used to rescale so branch lengths are in
        // expected substitutions per site.
        let mean = 2.0 * kappa * (pa * pg + pc * pt) + 2.0 * purines * pyrimidines;
        Ok(Self {
            kappa,
            freqs,
            alpha: kappa / mean,
            beta: 1.0 / mean,
        })
    }

    /// Transition probability matrix P(t).
    pub fn probability(&self, t: f64) -> [[f64; 4]; 4] {
        let [pa, pc, pg, pt] = self.freqs;
        let purines = pa + pg;
        let pyrimidines = pc + pt;
        let e2 = (-self.beta * t).exp();
        // Within-group decay rates differ between purines and pyrimidines.
        let e_pur = (-(purines * self.alpha + pyrimidines * self.beta) * t).exp();
        let e_pyr = (-(pyrimidines * self.alpha + purines * self.beta) * t).exp();

        let mut p = [[0.0; 4]; 4];
        for i in 0..4 {
            for j in 0..4 {
                let pj = self.freqs[j];
                let purine_j = j == 0 || j == 2;
                let (group, e_group) = if purine_j {
                    (purines, e_pur)
                } else {
                    (pyrimidines, e_pyr)
                };
                let same_group = (i == 0 || i == 2) == purine_j;
                p[i][j] = if i == j {
                    pj + pj * (1.0 - group) / group * e2 + (group - pj) / group * e_group
                } else if same_group {
                    pj + pj * (1.0 - group) / group * e2 - pj / group * e_group
                } else {
                    pj * (1.0 - e2)
                };
            }
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rows_sum_to_one(p: &[[f64; 4]; 4]) {
        for row in p {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-10, "row sums to {sum}");
        }
    }

    #[test]
    fn jc69_limits() {
        let p0 = jc69_probability(0.0);
        for (i, row) in p0.iter().enumerate() {
            assert!((row[i] - 1.0).abs() < 1e-12);
        }
        let pinf = jc69_probability(1e6);
        for row in pinf {
            for v in row {
                assert!((v - 0.25).abs() < 1e-9);
            }
        }
        assert_rows_sum_to_one(&jc69_probability(0.3));
    }

    #[test]
    fn hky_reduces_to_jc_at_kappa_one() {
        let hky = Hky85::new(1.0, [0.25; 4]).unwrap();
        let p = hky.probability(0.4);
        let jc = jc69_probability(0.4);
        for i in 0..4 {
            for j in 0..4 {
                assert!((p[i][j] - jc[i][j]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn hky_rows_are_distributions() {
        let hky = Hky85::new(2.5, [0.3, 0.2, 0.2, 0.3]).unwrap();
        for &t in &[0.0, 0.01, 0.5, 3.0] {
            assert_rows_sum_to_one(&hky.probability(t));
        }
    }

    #[test]
    fn hky_favors_transitions() {
        let hky = Hky85::new(4.0, [0.25; 4]).unwrap();
        let p = hky.probability(0.2);
        // A->G (transition) more likely than A->C (transversion).
        assert!(p[0][2] > p[0][1]);
    }

    #[test]
    fn hky_converges_to_frequencies() {
        let freqs = [0.1, 0.4, 0.2, 0.3];
        let hky = Hky85::new(2.0, freqs).unwrap();
        let p = hky.probability(500.0);
        for row in p {
            for (j, v) in row.iter().enumerate() {
                assert!((v - freqs[j]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn hky_rejects_bad_params() {
        assert!(Hky85::new(0.0, [0.25; 4]).is_err());
        assert!(Hky85::new(2.0, [0.5, 0.5, 0.2, 0.3]).is_err());
    }

    #[test]
    fn nucleotide_indexing() {
        assert_eq!(nucleotide_index(b'A'), Some(0));
        assert_eq!(nucleotide_index(b't'), Some(3));
        assert_eq!(nucleotide_index(b'N'), None);
        assert_eq!(nucleotide_index(b'-'), None);
    }
}
