//! Declarative connectivity rules
//!
//! A connect call pairs two gid collections with a rule and a synapse
//! specification. The rule decides which sources reach which targets; the
//! specification decides the synapse model and its per-connection weight
//! and delay values. Rules are target-driven so that every thread draws for
//! its own targets with the RNG of the target's virtual process, except
//! fixed-outdegree which is source-driven and draws from the global RNG on
//! every rank alike.

use rand::Rng;

use spikegrid_core::collection::GidCollection;
use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::ids::Gid;
use spikegrid_core::status::StatusDict;

/// The connectivity rule of a connect call
#[derive(Debug, Clone, PartialEq)]
pub enum ConnRule {
    /// Pair sources and targets index by index
    OneToOne,
    /// Connect every source to every target
    AllToAll,
    /// Draw a fixed number of sources for every target
    FixedIndegree {
        /// Connections per target
        indegree: usize,
    },
    /// Draw a fixed number of targets for every source
    FixedOutdegree {
        /// Connections per source
        outdegree: usize,
    },
    /// Keep each source-target pair with a fixed probability
    PairwiseBernoulli {
        /// Connection probability
        p: f64,
    },
}

/// Rule plus the structural flags of a connect call
#[derive(Debug, Clone, PartialEq)]
pub struct ConnSpec {
    /// The connectivity rule
    pub rule: ConnRule,
    /// Whether self-connections are allowed
    pub allow_autapses: bool,
    /// Whether duplicate pairs are allowed in random draws
    pub allow_multapses: bool,
}

impl ConnSpec {
    /// Create a spec with default structural flags
    pub fn new(rule: ConnRule) -> Self {
        Self {
            rule,
            allow_autapses: true,
            allow_multapses: true,
        }
    }

    /// Allow or forbid self-connections
    pub fn with_autapses(mut self, allow: bool) -> Self {
        self.allow_autapses = allow;
        self
    }

    /// Allow or forbid duplicate pairs
    pub fn with_multapses(mut self, allow: bool) -> Self {
        self.allow_multapses = allow;
        self
    }

    /// Validate the spec against the populations it will connect
    pub fn validate(&self, num_sources: usize, num_targets: usize) -> Result<()> {
        match &self.rule {
            ConnRule::OneToOne => {
                if num_sources != num_targets {
                    return Err(CoreError::dimension_mismatch(
                        "one_to_one sources",
                        num_sources,
                        num_targets,
                    ));
                }
            }
            ConnRule::FixedIndegree { indegree } => {
                if !self.allow_multapses && *indegree > num_sources {
                    return Err(CoreError::bad_property(
                        "indegree",
                        indegree.to_string(),
                        "<= number of sources without multapses",
                    ));
                }
            }
            ConnRule::FixedOutdegree { outdegree } => {
                if !self.allow_multapses && *outdegree > num_targets {
                    return Err(CoreError::bad_property(
                        "outdegree",
                        outdegree.to_string(),
                        "<= number of targets without multapses",
                    ));
                }
            }
            ConnRule::PairwiseBernoulli { p } => {
                if !(0.0..=1.0).contains(p) {
                    return Err(CoreError::bad_property(
                        "p",
                        p.to_string(),
                        "within [0, 1]",
                    ));
                }
            }
            ConnRule::AllToAll => {}
        }
        Ok(())
    }

    /// Whether the rule iterates sources instead of targets
    pub fn is_source_driven(&self) -> bool {
        matches!(self.rule, ConnRule::FixedOutdegree { .. })
    }

    /// The number of pairs a deterministic rule produces, if known upfront
    pub fn deterministic_pair_count(&self, num_sources: usize, num_targets: usize) -> Option<usize> {
        match self.rule {
            ConnRule::OneToOne => Some(num_targets),
            ConnRule::AllToAll => Some(num_sources * num_targets),
            _ => None,
        }
    }

    /// Draw the sources reaching one target
    ///
    /// `target_index` is the target's position in its collection; the RNG
    /// must belong to the target's virtual process.
    pub fn draw_sources<R: Rng>(
        &self,
        sources: &GidCollection,
        target: Gid,
        target_index: usize,
        rng: &mut R,
    ) -> Vec<Gid> {
        match &self.rule {
            ConnRule::OneToOne => sources.get(target_index).into_iter().collect(),
            ConnRule::AllToAll => sources
                .iter()
                .filter(|&s| self.allow_autapses || s != target)
                .collect(),
            ConnRule::FixedIndegree { indegree } => {
                let n = sources.len();
                let mut drawn = Vec::with_capacity(*indegree);
                while drawn.len() < *indegree {
                    let s = sources.get(rng.gen_range(0..n)).expect("index in range");
                    if !self.allow_autapses && s == target {
                        continue;
                    }
                    if !self.allow_multapses && drawn.contains(&s) {
                        continue;
                    }
                    drawn.push(s);
                }
                drawn
            }
            ConnRule::PairwiseBernoulli { p } => sources
                .iter()
                .filter(|&s| {
                    if !self.allow_autapses && s == target {
                        return false;
                    }
                    rng.gen_bool(*p)
                })
                .collect(),
            ConnRule::FixedOutdegree { .. } => Vec::new(),
        }
    }

    /// Draw the targets reached by one source, for source-driven rules
    pub fn draw_targets<R: Rng>(
        &self,
        targets: &GidCollection,
        source: Gid,
        rng: &mut R,
    ) -> Vec<Gid> {
        match &self.rule {
            ConnRule::FixedOutdegree { outdegree } => {
                let n = targets.len();
                let mut drawn = Vec::with_capacity(*outdegree);
                while drawn.len() < *outdegree {
                    let t = targets.get(rng.gen_range(0..n)).expect("index in range");
                    if !self.allow_autapses && t == source {
                        continue;
                    }
                    if !self.allow_multapses && drawn.contains(&t) {
                        continue;
                    }
                    drawn.push(t);
                }
                drawn
            }
            _ => Vec::new(),
        }
    }
}

/// A per-connection value: weight or delay
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    /// The same value for every connection
    Constant(f64),
    /// Uniform draw per connection
    Uniform {
        /// Lower bound, inclusive
        low: f64,
        /// Upper bound, exclusive
        high: f64,
    },
    /// One value per pair, in pair order
    List(Vec<f64>),
}

impl ValueSpec {
    /// Check a list spec against the pair count of a deterministic rule
    ///
    /// Random-degree rules have no upfront pair count, so list values are
    /// rejected there.
    pub fn validate(&self, what: &str, pair_count: Option<usize>) -> Result<()> {
        if let Self::List(values) = self {
            match pair_count {
                Some(expected) if values.len() != expected => Err(
                    CoreError::dimension_mismatch(what, values.len(), expected),
                ),
                Some(_) => Ok(()),
                None => Err(CoreError::bad_property(
                    what,
                    format!("list of {}", values.len()),
                    "scalar or distribution for probabilistic rules",
                )),
            }
        } else {
            Ok(())
        }
    }

    /// Produce the value for one pair
    pub fn resolve<R: Rng>(&self, pair_index: usize, rng: &mut R) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Uniform { low, high } => rng.gen_range(*low..*high),
            Self::List(values) => values[pair_index],
        }
    }
}

/// The synapse side of a connect call
#[derive(Debug, Clone)]
pub struct SynSpec {
    /// Registered synapse model name
    pub model: String,
    /// Weight per connection
    pub weight: ValueSpec,
    /// Delay per connection, in milliseconds
    pub delay: ValueSpec,
    /// Receptor port on the targets
    pub receptor: u32,
    /// Additional model parameters applied to every created connection
    pub params: StatusDict,
}

impl SynSpec {
    /// Create a spec for a model with unit weight and 1 ms delay
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            weight: ValueSpec::Constant(1.0),
            delay: ValueSpec::Constant(1.0),
            receptor: 0,
            params: StatusDict::new(),
        }
    }

    /// Set the weight spec
    pub fn with_weight(mut self, weight: ValueSpec) -> Self {
        self.weight = weight;
        self
    }

    /// Set the delay spec
    pub fn with_delay(mut self, delay: ValueSpec) -> Self {
        self.delay = delay;
        self
    }

    /// Set the receptor port
    pub fn with_receptor(mut self, receptor: u32) -> Self {
        self.receptor = receptor;
        self
    }

    /// Set additional connection parameters
    pub fn with_params(mut self, params: StatusDict) -> Self {
        self.params = params;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pop(first: u32, last: u32) -> GidCollection {
        GidCollection::range(Gid::new(first), Gid::new(last))
    }

    #[test]
    fn test_one_to_one_pairs_by_index() {
        let spec = ConnSpec::new(ConnRule::OneToOne);
        spec.validate(3, 3).unwrap();
        let sources = pop(1, 3);
        let mut rng = StdRng::seed_from_u64(1);
        let drawn = spec.draw_sources(&sources, Gid::new(12), 1, &mut rng);
        assert_eq!(drawn, vec![Gid::new(2)]);
    }

    #[test]
    fn test_one_to_one_length_mismatch() {
        let spec = ConnSpec::new(ConnRule::OneToOne);
        let err = spec.validate(3, 4).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_all_to_all_respects_autapse_flag() {
        let sources = pop(1, 4);
        let mut rng = StdRng::seed_from_u64(1);

        let spec = ConnSpec::new(ConnRule::AllToAll);
        let drawn = spec.draw_sources(&sources, Gid::new(2), 0, &mut rng);
        assert_eq!(drawn.len(), 4);

        let spec = spec.with_autapses(false);
        let drawn = spec.draw_sources(&sources, Gid::new(2), 0, &mut rng);
        assert_eq!(drawn.len(), 3);
        assert!(!drawn.contains(&Gid::new(2)));
    }

    #[test]
    fn test_fixed_indegree_draw_counts() {
        let sources = pop(1, 10);
        let spec = ConnSpec::new(ConnRule::FixedIndegree { indegree: 5 });
        let mut rng = StdRng::seed_from_u64(7);
        let drawn = spec.draw_sources(&sources, Gid::new(20), 0, &mut rng);
        assert_eq!(drawn.len(), 5);
    }

    #[test]
    fn test_fixed_indegree_without_multapses_is_distinct() {
        let sources = pop(1, 6);
        let spec = ConnSpec::new(ConnRule::FixedIndegree { indegree: 6 }).with_multapses(false);
        spec.validate(6, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut drawn = spec.draw_sources(&sources, Gid::new(20), 0, &mut rng);
        drawn.sort();
        drawn.dedup();
        assert_eq!(drawn.len(), 6);

        let spec = ConnSpec::new(ConnRule::FixedIndegree { indegree: 7 }).with_multapses(false);
        assert!(spec.validate(6, 1).is_err());
    }

    #[test]
    fn test_bernoulli_validation() {
        assert!(ConnSpec::new(ConnRule::PairwiseBernoulli { p: 1.5 })
            .validate(2, 2)
            .is_err());
        assert!(ConnSpec::new(ConnRule::PairwiseBernoulli { p: 0.5 })
            .validate(2, 2)
            .is_ok());
    }

    #[test]
    fn test_bernoulli_draw_is_deterministic_per_seed() {
        let sources = pop(1, 100);
        let spec = ConnSpec::new(ConnRule::PairwiseBernoulli { p: 0.3 });
        let a = spec.draw_sources(
            &sources,
            Gid::new(200),
            0,
            &mut StdRng::seed_from_u64(42),
        );
        let b = spec.draw_sources(
            &sources,
            Gid::new(200),
            0,
            &mut StdRng::seed_from_u64(42),
        );
        assert_eq!(a, b);
        assert!(!a.is_empty() && a.len() < 100);
    }

    #[test]
    fn test_fixed_outdegree_is_source_driven() {
        let spec = ConnSpec::new(ConnRule::FixedOutdegree { outdegree: 3 });
        assert!(spec.is_source_driven());
        let targets = pop(1, 8);
        let mut rng = StdRng::seed_from_u64(3);
        let drawn = spec.draw_targets(&targets, Gid::new(9), &mut rng);
        assert_eq!(drawn.len(), 3);
    }

    #[test]
    fn test_value_spec_list_validation() {
        let spec = ValueSpec::List(vec![1.0, 2.0]);
        assert!(spec.validate("weight", Some(2)).is_ok());
        assert!(matches!(
            spec.validate("weight", Some(3)).unwrap_err(),
            CoreError::DimensionMismatch { .. }
        ));
        assert!(spec.validate("weight", None).is_err());
    }

    #[test]
    fn test_value_spec_resolve() {
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(ValueSpec::Constant(2.5).resolve(0, &mut rng), 2.5);
        assert_eq!(ValueSpec::List(vec![1.0, 2.0]).resolve(1, &mut rng), 2.0);
        let v = ValueSpec::Uniform { low: 1.0, high: 2.0 }.resolve(0, &mut rng);
        assert!((1.0..2.0).contains(&v));
    }
}
