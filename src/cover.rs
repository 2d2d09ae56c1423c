//! # Coverage Building and Set Cover
//!
//! Turns a needed-gene list into a set-cover instance over the pool: each
//! pool individual maps to the subset of needed genes for which they carry a
//! finite ASE observation. Individuals covering nothing are excluded up
//! front. The solver itself is a collaborator behind the [`SetCover`] trait;
//! [`GreedySetCover`] is the default implementation and is best-effort: when
//! the pool cannot cover every needed gene it covers whatever is coverable
//! and stops.

use ndarray::ArrayView2;
use std::collections::HashSet;

/// A set-cover instance restricted to the pool.
///
/// `individuals[i]` is a pool row index and `covered[i]` is the set of
/// needed genes that individual would contribute; the two vectors are
/// parallel and `covered[i]` is never empty.
#[derive(Debug, Clone)]
pub struct CoverageMap {
    pub individuals: Vec<usize>,
    pub covered: Vec<HashSet<usize>>,
}

impl CoverageMap {
    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }
}

/// Builds the coverage map from the pool's maternal expression matrix.
///
/// A finite entry at (individual, gene) means the individual is heterozygous
/// there and would contribute an ASE observation for that gene.
pub fn to_set_cover(ym_pool: ArrayView2<f64>, needed_genes: &[usize]) -> CoverageMap {
    let mut individuals = Vec::new();
    let mut covered = Vec::new();
    for (row, expression) in ym_pool.rows().into_iter().enumerate() {
        let genes: HashSet<usize> = needed_genes
            .iter()
            .copied()
            .filter(|&g| expression[g].is_finite())
            .collect();
        if !genes.is_empty() {
            individuals.push(row);
            covered.push(genes);
        }
    }
    CoverageMap {
        individuals,
        covered,
    }
}

/// The set-cover collaborator: selects a small subset of the candidate sets
/// whose union covers as much of the universe as achievable.
///
/// Returns indices into `sets`, in selection order.
pub trait SetCover {
    fn solve(&self, universe: &[usize], sets: &[HashSet<usize>]) -> Vec<usize>;
}

/// The classic greedy heuristic: repeatedly take the set covering the most
/// still-uncovered elements, breaking ties toward the lowest index.
pub struct GreedySetCover;

impl SetCover for GreedySetCover {
    fn solve(&self, universe: &[usize], sets: &[HashSet<usize>]) -> Vec<usize> {
        let mut uncovered: HashSet<usize> = universe.iter().copied().collect();
        let mut taken = vec![false; sets.len()];
        let mut selection = Vec::new();

        while !uncovered.is_empty() {
            let mut best: Option<(usize, usize)> = None;
            for (idx, set) in sets.iter().enumerate() {
                if taken[idx] {
                    continue;
                }
                let gain = set.intersection(&uncovered).count();
                if gain > 0 && best.is_none_or(|(_, g)| gain > g) {
                    best = Some((idx, gain));
                }
            }
            // No remaining set intersects the universe: the rest is uncoverable.
            let Some((idx, _)) = best else { break };
            taken[idx] = true;
            for g in &sets[idx] {
                uncovered.remove(g);
            }
            selection.push(idx);
        }
        selection
    }
}
