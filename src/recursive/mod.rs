//! Recursive RBMs over sequences and trees.
//!
//! A single [`Rbm`] parameter set is evaluated at every position of a
//! [`Structure`]. The visible vector at a position is its external features
//! followed by one context slot per child, each slot holding that child's
//! hidden expectation (or zeros for an empty slot):
//!
//! ```text
//! [ features | h(child 0) | h(child 1) | ... | h(child arity-1) ]
//! ```
//!
//! Positions are evaluated children first, so every context slot is filled
//! before it is read.

mod cdk;
mod structure;

pub use self::cdk::RecursiveCdkTrainer;
pub use self::structure::Structure;

use crate::error::{check_len, Error, Result};
use crate::matrix;
use crate::rbm::Rbm;
use crate::transform::Transform;
use crate::units::{Activation, Unit};

use ndarray::{s, Array1};
use rand::Rng;

/// One evaluation of the shared RBM at a structural position.
#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    pub position: usize,
    /// The assembled visible vector.
    pub visible: Array1<f64>,
    /// The hidden expectation given `visible`.
    pub hidden: Array1<f64>,
}

/// The cached result of a bottom-up pass over a structure.
#[derive(Clone, Debug, PartialEq)]
pub struct Forward {
    /// Sites in evaluation order.
    sites: Vec<Site>,
    /// Index into `sites` for every position.
    index: Vec<usize>,
}

impl Forward {
    /// Sites in evaluation order.
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// The hidden representation computed at `position`.
    pub fn hidden(&self, position: usize) -> &Array1<f64> {
        &self.sites[self.index[position]].hidden
    }

    /// The last site evaluated, whose hidden state summarizes the structure
    /// when it has a single root.
    pub fn root(&self) -> Option<&Site> {
        self.sites.last()
    }

    /// Hidden representations indexed by position.
    pub fn into_hidden(self) -> Vec<Array1<f64>> {
        let mut by_position = vec![Array1::zeros(0); self.sites.len()];
        for site in self.sites {
            let position = site.position;
            by_position[position] = site.hidden;
        }
        by_position
    }
}

/// An RBM whose visible layer is partly built from the hidden states of
/// related positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecursiveRbm {
    rbm: Rbm,
    input: Unit,
    arity: usize,
}

impl RecursiveRbm {
    /// Creates a new, untrained recursive RBM reading `input` features and at
    /// most `arity` children per position.
    pub fn new<R>(input: Unit, hidden: Unit, arity: usize, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        let visible = Unit::new(input.family(), input.size() + arity * hidden.size());
        let rbm = Rbm::new(visible, hidden, rng)?;
        RecursiveRbm::from_rbm(rbm, input.size(), arity)
    }

    /// Wraps an existing RBM whose visible layer holds `input_size` features
    /// followed by `arity` context slots.
    pub fn from_rbm(rbm: Rbm, input_size: usize, arity: usize) -> Result<Self> {
        check_len(
            "recursive visible layer",
            input_size + arity * rbm.hidden_size(),
            rbm.visible_size(),
        )?;
        if input_size == 0 {
            return Err(Error::InvalidConfiguration(
                "recursive input size must be positive".to_string(),
            ));
        }
        let input = Unit::new(rbm.visible().family(), input_size);
        Ok(RecursiveRbm { rbm, input, arity })
    }

    /// The shared RBM evaluated at every position.
    pub fn rbm(&self) -> &Rbm {
        &self.rbm
    }

    pub fn input(&self) -> &Unit {
        &self.input
    }

    pub fn input_size(&self) -> usize {
        self.input.size()
    }

    pub fn hidden_size(&self) -> usize {
        self.rbm.hidden_size()
    }

    /// Maximum number of children per position.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn visible_size(&self) -> usize {
        self.rbm.visible_size()
    }

    /// Checks the topology and every position's dimensions, returning the
    /// evaluation order. Nothing is sampled.
    pub fn validate(&self, structure: &Structure) -> Result<Vec<usize>> {
        if structure.is_empty() {
            return Err(Error::StructuralMismatch("structure has no positions".to_string()));
        }
        let order = structure.evaluation_order()?;
        for position in 0..structure.len() {
            let children = structure.children(position).len();
            let assembled = self.input_size() + children * self.hidden_size();
            if children > self.arity || assembled > self.visible_size() {
                return Err(Error::StructuralMismatch(format!(
                    "position {} has {} children, assembling {} visible units \
                     where {} are declared",
                    position,
                    children,
                    assembled,
                    self.visible_size()
                )));
            }
        }
        Ok(order)
    }

    /// Computes the hidden expectation at every position, children first.
    pub fn forward(&self, structure: &Structure) -> Result<Forward> {
        self.check_features(structure)?;
        let order = self.validate(structure)?;
        let mut sites: Vec<Site> = Vec::with_capacity(order.len());
        let mut index = vec![0; structure.len()];
        for position in order {
            let visible = {
                let children = structure
                    .children(position)
                    .iter()
                    .map(|&child| &sites[index[child]].hidden);
                self.assemble(structure.features(position), children)
            };
            let hidden = self.rbm.hidden_expectation(&visible);
            index[position] = sites.len();
            sites.push(Site {
                position,
                visible,
                hidden,
            });
        }
        Ok(Forward { sites, index })
    }

    /// The hidden representation of the last position evaluated.
    pub fn root_hidden(&self, structure: &Structure) -> Result<Array1<f64>> {
        let forward = self.forward(structure)?;
        forward
            .root()
            .map(|site| site.hidden.clone())
            .ok_or_else(|| Error::StructuralMismatch("structure has no positions".to_string()))
    }

    /// Computes the visible expectation given `h`: the input segment uses the
    /// input unit family, every context slot the hidden unit family.
    pub fn visible_expectation(&self, h: &Array1<f64>) -> Array1<f64> {
        let pre = self.rbm.visible_preactivation(h);
        let mut out = Array1::<f64>::zeros(pre.len());
        self.for_each_segment(|unit, start, end| {
            let expected = unit.expected(&pre.slice(s![start..end]).to_owned());
            out.slice_mut(s![start..end]).assign(&expected);
        });
        out
    }

    /// Samples the visible layer given `h`, segment by segment.
    pub fn visible_given_hidden<R>(&self, h: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized,
    {
        let pre = self.rbm.visible_preactivation(h);
        let mut expected = Array1::<f64>::zeros(pre.len());
        let mut sample = Array1::<f64>::zeros(pre.len());
        self.for_each_segment(|unit, start, end| {
            let activation = unit.activate(&pre.slice(s![start..end]).to_owned(), &mut *rng);
            expected.slice_mut(s![start..end]).assign(&activation.expected);
            sample.slice_mut(s![start..end]).assign(&activation.sample);
        });
        Activation { expected, sample }
    }

    /// Runs one deterministic up-down pass over an assembled visible vector.
    pub fn reconstruct(&self, visible: &Array1<f64>) -> Array1<f64> {
        self.visible_expectation(&self.rbm.hidden_expectation(visible))
    }

    /// The free energy of one assembled visible vector.
    pub fn site_free_energy(&self, visible: &Array1<f64>) -> f64 {
        let mut self_energy = 0.0;
        self.for_each_segment(|unit, start, end| {
            self_energy += unit.self_energy(&visible.slice(s![start..end]).to_owned());
        });
        self_energy
            - self.rbm.params().visible_bias.dot(visible)
            - self
                .rbm
                .hidden()
                .log_partition(&self.rbm.hidden_preactivation(visible))
    }

    /// The free energy of a structure: the sum over its positions.
    pub fn free_energy(&self, structure: &Structure) -> Result<f64> {
        let forward = self.forward(structure)?;
        Ok(forward
            .sites()
            .iter()
            .map(|site| self.site_free_energy(&site.visible))
            .sum())
    }

    /// Unrolls the final hidden state of a sequence back into `len` input
    /// reconstructions, first position first.
    ///
    /// Each step reconstructs the visible layer, emits its input segment and
    /// continues from its context slot. Requires an arity of one.
    pub fn decode_sequence(&self, h: &Array1<f64>, len: usize) -> Result<Vec<Array1<f64>>> {
        if self.arity != 1 {
            return Err(Error::InvalidConfiguration(format!(
                "sequence decoding needs arity 1, got {}",
                self.arity
            )));
        }
        check_len("hidden vector", self.hidden_size(), h.len())?;
        let split = self.input_size();
        let mut hidden = h.clone();
        let mut inputs = Vec::with_capacity(len);
        for _ in 0..len {
            let visible = self.visible_expectation(&hidden);
            inputs.push(visible.slice(s![..split]).to_owned());
            hidden = visible.slice(s![split..]).to_owned();
        }
        inputs.reverse();
        Ok(inputs)
    }

    pub(crate) fn rbm_mut(&mut self) -> &mut Rbm {
        &mut self.rbm
    }

    /// Checks that every feature vector has `input_size` entries.
    pub(crate) fn check_features(&self, structure: &Structure) -> Result<()> {
        for position in 0..structure.len() {
            check_len("input features", self.input_size(), structure.features(position).len())?;
        }
        Ok(())
    }

    /// Concatenates features with the given child states, padding empty
    /// context slots with zeros.
    fn assemble<'a, I>(&self, features: &Array1<f64>, children: I) -> Array1<f64>
    where
        I: Iterator<Item = &'a Array1<f64>>,
    {
        let mut visible = Array1::<f64>::zeros(self.visible_size());
        visible.slice_mut(s![..self.input_size()]).assign(features);
        let mut start = self.input_size();
        for child in children {
            let end = start + self.hidden_size();
            visible.slice_mut(s![start..end]).assign(child);
            start = end;
        }
        visible
    }

    /// Calls `f(unit, start, end)` for the input segment and every context
    /// slot of the visible layer.
    fn for_each_segment<F>(&self, mut f: F)
    where
        F: FnMut(&Unit, usize, usize),
    {
        f(&self.input, 0, self.input_size());
        let context = Unit::new(self.rbm.hidden().family(), self.hidden_size());
        for slot in 0..self.arity {
            let start = self.input_size() + slot * self.hidden_size();
            f(&context, start, start + self.hidden_size());
        }
    }
}

impl Transform for RecursiveRbm {
    type Input = Structure;
    type Output = Vec<Array1<f64>>;

    /// Returns the hidden representation of every position, indexed by
    /// position.
    fn transform(&self, structure: &Structure) -> Result<Vec<Array1<f64>>> {
        Ok(self.forward(structure)?.into_hidden())
    }
}

/// Squared reconstruction error of one site.
pub(crate) fn site_error(model: &RecursiveRbm, visible: &Array1<f64>) -> f64 {
    matrix::squared_distance(visible, &model.reconstruct(visible))
}
