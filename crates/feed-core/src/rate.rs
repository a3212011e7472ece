//! Delivery wave partitioning
//!
//! A [`RateController`] is armed with the full target list and then drained
//! wave by wave. Waves preserve input order.

use std::collections::VecDeque;

/// Splits a target list into sequential delivery waves
pub trait RateController<T>: Send {
    /// Replace any pending targets with `targets`
    fn arrange(&mut self, targets: Vec<T>);

    /// Next wave, `None` once every target has been handed out
    fn next(&mut self) -> Option<Vec<T>>;
}

/// One unstaged wave containing every target
#[derive(Debug)]
pub struct SimpleRateController<T> {
    pending: Option<Vec<T>>,
}

impl<T> SimpleRateController<T> {
    /// Create an empty controller
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { pending: None }
    }
}

impl<T> Default for SimpleRateController<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> RateController<T> for SimpleRateController<T> {
    fn arrange(&mut self, targets: Vec<T>) {
        self.pending = (!targets.is_empty()).then_some(targets);
    }

    fn next(&mut self) -> Option<Vec<T>> {
        self.pending.take()
    }
}

/// Fixed-size waves of at most `step` targets
#[derive(Debug)]
pub struct StagedRateController<T> {
    step: usize,
    pending: VecDeque<T>,
}

impl<T> StagedRateController<T> {
    /// Create controller handing out `step` targets per wave (minimum 1)
    #[inline]
    #[must_use]
    pub fn new(step: usize) -> Self {
        Self {
            step: step.max(1),
            pending: VecDeque::new(),
        }
    }

    /// Targets not yet handed out
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl<T: Send> RateController<T> for StagedRateController<T> {
    fn arrange(&mut self, targets: Vec<T>) {
        self.pending = targets.into();
    }

    fn next(&mut self) -> Option<Vec<T>> {
        if self.pending.is_empty() {
            return None;
        }
        let take = self.step.min(self.pending.len());
        Some(self.pending.drain(..take).collect())
    }
}

/// How publish fan-out is staggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RolloutPolicy {
    /// Everything in a single wave
    #[default]
    Unstaged,
    /// Waves of `step_size` targets
    Staged {
        /// Targets per wave
        step_size: usize,
    },
}

impl RolloutPolicy {
    /// Fresh controller implementing this policy
    #[must_use]
    pub fn controller<T: Send + 'static>(self) -> Box<dyn RateController<T>> {
        match self {
            Self::Unstaged => Box::new(SimpleRateController::new()),
            Self::Staged { step_size } => Box::new(StagedRateController::new(step_size)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain<T, C: RateController<T> + ?Sized>(controller: &mut C) -> Vec<Vec<T>> {
        std::iter::from_fn(|| controller.next()).collect()
    }

    #[test]
    fn simple_is_one_wave() {
        let mut controller = SimpleRateController::new();
        controller.arrange(vec![1, 2, 3]);
        assert_eq!(controller.next(), Some(vec![1, 2, 3]));
        assert_eq!(controller.next(), None);
    }

    #[test]
    fn simple_with_no_targets() {
        let mut controller = SimpleRateController::<u32>::new();
        controller.arrange(Vec::new());
        assert_eq!(controller.next(), None);
    }

    #[test]
    fn staged_ten_by_three() {
        let mut controller = StagedRateController::new(3);
        controller.arrange((0..10).collect());
        let waves = drain(&mut controller);
        let sizes: Vec<usize> = waves.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(waves.concat(), (0..10).collect::<Vec<_>>());
        assert_eq!(controller.next(), None);
    }

    #[test]
    fn staged_zero_step_is_one() {
        let mut controller = StagedRateController::new(0);
        controller.arrange(vec!['a', 'b']);
        assert_eq!(controller.next(), Some(vec!['a']));
        assert_eq!(controller.remaining(), 1);
    }

    #[test]
    fn rearrange_replaces_pending() {
        let mut controller = StagedRateController::new(2);
        controller.arrange(vec![1, 2, 3]);
        let _ = controller.next();
        controller.arrange(vec![9]);
        assert_eq!(drain(&mut controller), vec![vec![9]]);
    }

    #[test]
    fn policy_builds_matching_controller() {
        let mut unstaged = RolloutPolicy::Unstaged.controller();
        unstaged.arrange(vec![1, 2, 3, 4]);
        assert_eq!(drain(unstaged.as_mut()).len(), 1);

        let mut staged = RolloutPolicy::Staged { step_size: 2 }.controller();
        staged.arrange(vec![1, 2, 3, 4]);
        assert_eq!(drain(staged.as_mut()).len(), 2);
    }

    proptest! {
        #[test]
        fn staged_waves_preserve_order(len in 0usize..200, step in 1usize..20) {
            let targets: Vec<usize> = (0..len).collect();
            let mut controller = StagedRateController::new(step);
            controller.arrange(targets.clone());
            let waves = drain(&mut controller);

            prop_assert_eq!(waves.len(), len.div_ceil(step));
            prop_assert!(waves.iter().all(|w| !w.is_empty() && w.len() <= step));
            prop_assert_eq!(waves.concat(), targets);
        }
    }
}
