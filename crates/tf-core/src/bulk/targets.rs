use std::collections::HashSet;

use rand::{rngs::StdRng, seq::index, SeedableRng};

use crate::{
    bulk::types::{OperationClass, Target},
    errors::Error,
    Result,
};

/// Finite, restartable snapshot of the targets of one run.
///
/// Duplicates (same `TargetId`) are dropped at construction, first one wins.
#[derive(Clone, Debug, Default)]
pub struct TargetSource {
    targets: Vec<Target>,
}

impl TargetSource {
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .collect();
        Self { targets }
    }

    /// Keep `count` targets picked uniformly without replacement.
    ///
    /// With a seed the pick is reproducible for the same snapshot.
    pub fn sampled(self, count: usize, seed: Option<u64>) -> Result<Self> {
        if count == 0 || count > self.targets.len() {
            return Err(Error::InvalidPlan(format!(
                "sample size must be between 1 and {}, got {count}",
                self.targets.len()
            )));
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let picked = index::sample(&mut rng, self.targets.len(), count);

        let mut slots: Vec<Option<Target>> = self.targets.into_iter().map(Some).collect();
        let targets = picked
            .into_vec()
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect();
        Ok(Self { targets })
    }

    /// Iterate from the start; every call restarts the sequence.
    pub fn iter(&self) -> impl Iterator<Item = &Target> + '_ {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The distinct operation classes present, in first-seen order.
    pub fn classes(&self) -> Vec<OperationClass> {
        let mut out = Vec::new();
        for t in &self.targets {
            let class = t.class();
            if !out.contains(&class) {
                out.push(class);
            }
        }
        out
    }

    pub fn into_vec(self) -> Vec<Target> {
        self.targets
    }
}

impl FromIterator<Target> for TargetSource {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        Self::new(iter)
    }
}
