//! Structured training examples: sequences and trees of feature vectors.

use crate::error::{Error, Result};

use ndarray::Array1;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// A structured example: one external feature vector per position plus the
/// positions each position reads hidden state from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    features: Vec<Array1<f64>>,
    children: Vec<Vec<usize>>,
}

impl Structure {
    /// A left-to-right sequence: position `i` reads from position `i - 1`.
    pub fn sequence(features: Vec<Array1<f64>>) -> Self {
        let children = (0..features.len())
            .map(|i| if i == 0 { Vec::new() } else { vec![i - 1] })
            .collect();
        Structure { features, children }
    }

    /// A tree (or forest) where `children[p]` lists the positions whose
    /// hidden states feed position `p`, in slot order.
    ///
    /// The topology is checked when the structure is evaluated.
    pub fn tree(features: Vec<Array1<f64>>, children: Vec<Vec<usize>>) -> Self {
        Structure { features, children }
    }

    /// The number of positions.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// External features at `position`.
    pub fn features(&self, position: usize) -> &Array1<f64> {
        &self.features[position]
    }

    /// Children of `position`, in slot order.
    pub fn children(&self, position: usize) -> &[usize] {
        &self.children[position]
    }

    /// Returns an evaluation order in which every position comes after all
    /// of its children.
    ///
    /// Ties are broken by the lowest position first, so sequences evaluate
    /// left to right. Fails if the topology refers to a missing position or
    /// contains a cycle.
    pub fn evaluation_order(&self) -> Result<Vec<usize>> {
        let n = self.len();
        if self.children.len() != n {
            return Err(Error::StructuralMismatch(format!(
                "{} positions but {} child lists",
                n,
                self.children.len()
            )));
        }

        let mut pending = vec![0usize; n];
        let mut parents = vec![Vec::new(); n];
        for (position, children) in self.children.iter().enumerate() {
            for &child in children {
                if child >= n {
                    return Err(Error::StructuralMismatch(format!(
                        "position {} refers to missing child {}",
                        position, child
                    )));
                }
                pending[position] += 1;
                parents[child].push(position);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&p| pending[p] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(position)) = ready.pop() {
            order.push(position);
            for &parent in &parents[position] {
                pending[parent] -= 1;
                if pending[parent] == 0 {
                    ready.push(Reverse(parent));
                }
            }
        }

        if order.len() != n {
            return Err(Error::StructuralMismatch(format!(
                "cycle through {} positions",
                n - order.len()
            )));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn features(n: usize) -> Vec<Array1<f64>> {
        (0..n).map(|i| array![i as f64]).collect()
    }

    #[test]
    fn sequence_evaluates_left_to_right() {
        let s = Structure::sequence(features(4));
        assert_eq!(s.children(0), &[] as &[usize]);
        assert_eq!(s.children(3), &[2]);
        assert_eq!(s.evaluation_order(), Ok(vec![0, 1, 2, 3]));
    }

    #[test]
    fn tree_evaluates_children_first() {
        //      0
        //    /   \
        //   2     1
        //  / \
        // 3   4
        let s = Structure::tree(features(5), vec![vec![2, 1], vec![], vec![3, 4], vec![], vec![]]);
        let order = s.evaluation_order().unwrap();
        assert_eq!(order, vec![1, 3, 4, 2, 0]);
    }

    #[test]
    fn rejects_cycles() {
        let s = Structure::tree(features(3), vec![vec![1], vec![2], vec![0]]);
        assert!(matches!(s.evaluation_order(), Err(Error::StructuralMismatch(_))));

        let s = Structure::tree(features(1), vec![vec![0]]);
        assert!(s.evaluation_order().is_err());
    }

    #[test]
    fn rejects_missing_children() {
        let s = Structure::tree(features(2), vec![vec![5], vec![]]);
        assert!(matches!(s.evaluation_order(), Err(Error::StructuralMismatch(_))));

        let s = Structure::tree(features(2), vec![vec![]]);
        assert!(s.evaluation_order().is_err());
    }

    #[test]
    fn empty_structure_has_empty_order() {
        assert_eq!(Structure::sequence(Vec::new()).evaluation_order(), Ok(vec![]));
    }
}
