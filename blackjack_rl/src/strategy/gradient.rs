use rand::rngs::StdRng;
use rand::Rng;

use super::{Agent, Transition};
use crate::{Action, BlackjackError, Result, State};

const FEATURES: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientParams {
    pub learning_rate: f64,
    pub gamma: f64,
    /// Step size of the running return baseline.
    pub baseline_rate: f64,
}

impl Default for GradientParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            gamma: 1.0,
            baseline_rate: 0.01,
        }
    }
}

impl GradientParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(BlackjackError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(BlackjackError::InvalidConfig(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        if !(0.0..=1.0).contains(&self.baseline_rate) {
            return Err(BlackjackError::InvalidConfig(format!(
                "baseline_rate must be in [0, 1], got {}",
                self.baseline_rate
            )));
        }
        Ok(())
    }
}

/// Linear softmax policy over hand features, trained with REINFORCE at the end
/// of each episode. Shares nothing with the tabular learner except the `Agent`
/// interface.
pub struct PolicyGradientAgent {
    params: GradientParams,
    weights: [[f64; FEATURES]; Action::COUNT],
    baseline: f64,
    episode: Vec<(State, Action, f64)>,
    rng: StdRng,
}

impl PolicyGradientAgent {
    pub fn new(params: GradientParams, rng: StdRng) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            weights: [[0.0; FEATURES]; Action::COUNT],
            baseline: 0.0,
            episode: Vec::new(),
            rng,
        })
    }

    /// Probability of each action, indexed by `Action::index`.
    pub fn probabilities(&self, state: &State) -> [f64; Action::COUNT] {
        let features = features(state);
        let mut logits = [0.0; Action::COUNT];
        for (logit, weights) in logits.iter_mut().zip(&self.weights) {
            *logit = weights.iter().zip(&features).map(|(w, x)| w * x).sum();
        }
        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut probabilities = logits.map(|logit| (logit - max).exp());
        let sum: f64 = probabilities.iter().sum();
        for p in probabilities.iter_mut() {
            *p /= sum;
        }
        probabilities
    }

    fn learn_from_episode(&mut self) {
        let mut returns = vec![0.0; self.episode.len()];
        let mut g = 0.0;
        for (t, (_, _, reward)) in self.episode.iter().enumerate().rev() {
            g = reward + self.params.gamma * g;
            returns[t] = g;
        }

        let mut discount = 1.0;
        let steps = std::mem::take(&mut self.episode);
        for ((state, action, _), g) in steps.iter().zip(&returns) {
            let advantage = g - self.baseline;
            let probabilities = self.probabilities(state);
            let x = features(state);
            for (b, weights) in self.weights.iter_mut().enumerate() {
                let indicator = if b == action.index() { 1.0 } else { 0.0 };
                let scale =
                    self.params.learning_rate * discount * advantage * (indicator - probabilities[b]);
                for (w, feature) in weights.iter_mut().zip(&x) {
                    *w += scale * feature;
                }
            }
            discount *= self.params.gamma;
        }

        if let Some(first) = returns.first() {
            self.baseline += self.params.baseline_rate * (first - self.baseline);
        }
    }
}

fn features(state: &State) -> [f64; FEATURES] {
    let total = state.player_total as f64 / 21.0;
    [
        1.0,
        total,
        total * total,
        state.dealer_upcard as f64 / 11.0,
        if state.usable_ace { 1.0 } else { 0.0 },
        state.true_count_bucket as f64 / 6.0,
        if state.player_total >= 17 { 1.0 } else { 0.0 },
    ]
}

impl Agent for PolicyGradientAgent {
    fn select_action(&mut self, state: &State, explore: bool) -> Action {
        let probabilities = self.probabilities(state);
        let hit = probabilities[Action::Hit.index()];
        if explore {
            if self.rng.gen::<f64>() < hit {
                Action::Hit
            } else {
                Action::Stand
            }
        } else if hit > probabilities[Action::Stand.index()] {
            Action::Hit
        } else {
            Action::Stand
        }
    }

    fn observe(&mut self, transition: &Transition) {
        self.episode
            .push((transition.state, transition.action, transition.reward));
        if transition.done {
            self.learn_from_episode();
        }
    }

    fn begin_episode(&mut self, _episode: u64, _total_episodes: u64) {
        self.episode.clear();
    }
}
