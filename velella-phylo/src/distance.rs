//! Pairwise evolutionary distances between aligned sequences.

use velella_core::{Result, VelellaError};

/// A symmetric matrix of pairwise distances.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Zero matrix for `n` taxa.
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            values: vec![0.0; n * n],
        }
    }

    /// Number of taxa.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Distance between taxa `i` and `j`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    /// Set the distance between `i` and `j` (and its mirror).
    pub fn set(&mut self, i: usize, j: usize, d: f64) {
        self.values[i * self.n + j] = d;
        self.values[j * self.n + i] = d;
    }
}

/// Proportion of differing sites between two equal-length sequences.
pub fn p_distance(a: &[u8], b: &[u8]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(VelellaError::InvalidInput(format!(
            "sequence lengths differ: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    if a.is_empty() {
        return Err(VelellaError::InvalidInput("empty sequences".into()));
    }
    let diffs = a.iter().zip(b).filter(|(x, y)| x != y).count();
    Ok(diffs as f64 / a.len() as f64)
}

/// Jukes-Cantor correction of a raw proportion of differences.
///
/// Saturated distances (p ≥ 3/4) are clamped to a large finite value so
/// downstream neighbor joining stays well defined.
pub fn jukes_cantor(p: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&p) {
        return Err(VelellaError::InvalidInput(format!(
            "p-distance {p} outside [0, 1]"
        )));
    }
    let arg = 1.0 - 4.0 * p / 3.0;
    if arg <= 0.0 {
        return Ok(10.0);
    }
    Ok(-0.75 * arg.ln())
}

/// Build a Jukes-Cantor distance matrix from aligned sequences.
///
/// Deterministic given its input; all sequences must share one length.
pub fn distance_matrix(seqs: &[&[u8]]) -> Result<DistanceMatrix> {
    if seqs.len() < 2 {
        return Err(VelellaError::InvalidInput(
            "need at least 2 sequences".into(),
        ));
    }
    let mut matrix = DistanceMatrix::zeros(seqs.len());
    for i in 0..seqs.len() {
        for j in (i + 1)..seqs.len() {
            let p = p_distance(seqs[i], seqs[j])?;
            matrix.set(i, j, jukes_cantor(p)?);
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_distance_counts_mismatches() {
        assert_eq!(p_distance(b"ACGT", b"ACGT").unwrap(), 0.0);
        assert_eq!(p_distance(b"ACGT", b"ACGA").unwrap(), 0.25);
    }

    #[test]
    fn p_distance_rejects_length_mismatch() {
        assert!(p_distance(b"ACG", b"ACGT").is_err());
        assert!(p_distance(b"", b"").is_err());
    }

    #[test]
    fn jukes_cantor_zero_and_monotone() {
        assert_eq!(jukes_cantor(0.0).unwrap(), 0.0);
        let d1 = jukes_cantor(0.1).unwrap();
        let d2 = jukes_cantor(0.3).unwrap();
        assert!(d2 > d1 && d1 > 0.0);
        // Correction always exceeds the raw proportion.
        assert!(d1 > 0.1);
    }

    #[test]
    fn jukes_cantor_saturation_clamped() {
        assert_eq!(jukes_cantor(0.8).unwrap(), 10.0);
    }

    #[test]
    fn matrix_is_symmetric() {
        let seqs: Vec<&[u8]> = vec![b"AACC", b"AACA", b"TTGG"];
        let m = distance_matrix(&seqs).unwrap();
        assert_eq!(m.n(), 3);
        for i in 0..3 {
            assert_eq!(m.get(i, i), 0.0);
            for j in 0..3 {
                assert_eq!(m.get(i, j), m.get(j, i));
            }
        }
        assert!(m.get(0, 1) < m.get(0, 2));
    }
}
