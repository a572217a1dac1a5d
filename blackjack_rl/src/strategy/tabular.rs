use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;

use super::{Agent, EpsilonSchedule, Transition};
use crate::{Action, BlackjackError, Result, State, ValueTable};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningParams {
    pub alpha: f64,
    pub gamma: f64,
    /// 0 selects one-step Q-learning, anything above selects on-policy TD(lambda).
    pub lambda: f64,
    pub epsilon: EpsilonSchedule,
    /// Decays alpha linearly to zero over the training run.
    pub alpha_decay: bool,
}

impl Default for LearningParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.9,
            lambda: 0.9,
            epsilon: EpsilonSchedule::default(),
            alpha_decay: false,
        }
    }
}

impl LearningParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(BlackjackError::InvalidConfig(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(BlackjackError::InvalidConfig(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(BlackjackError::InvalidConfig(format!(
                "lambda must be in [0, 1], got {}",
                self.lambda
            )));
        }
        self.epsilon.validate()
    }
}

/// Epsilon-greedy agent over a value table.
pub struct TabularAgent {
    table: ValueTable,
    params: LearningParams,
    alpha: f64,
    epsilon: f64,
    /// Eligibility per table slot, only for the current episode.
    traces: HashMap<usize, f64>,
    rng: StdRng,
}

impl TabularAgent {
    pub fn new(table: ValueTable, params: LearningParams, rng: StdRng) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            table,
            params,
            alpha: params.alpha,
            epsilon: params.epsilon.start,
            traces: HashMap::new(),
            rng,
        })
    }

    pub fn table(&self) -> &ValueTable {
        &self.table
    }

    pub fn into_table(self) -> ValueTable {
        self.table
    }

    /// Swaps in a new table, e.g. the merge of several workers.
    pub fn replace_table(&mut self, table: ValueTable) {
        self.table = table;
        self.traces.clear();
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn bootstrap(&self, transition: &Transition) -> f64 {
        if transition.done {
            return 0.0;
        }
        let next = &transition.next_state;
        let next_value = if self.params.lambda == 0.0 {
            self.table.max_value(next)
        } else {
            let next_action = transition
                .next_action
                .unwrap_or_else(|| self.table.best_action(next));
            self.table[(*next, next_action)]
        };
        self.params.gamma * next_value
    }
}

impl Agent for TabularAgent {
    fn select_action(&mut self, state: &State, explore: bool) -> Action {
        if explore && self.rng.gen::<f64>() < self.epsilon {
            if self.rng.gen_bool(0.5) {
                Action::Hit
            } else {
                Action::Stand
            }
        } else {
            self.table.best_action(state)
        }
    }

    fn observe(&mut self, transition: &Transition) {
        let Some(index) = self.table.index_of(&transition.state, transition.action) else {
            log::warn!("ignoring transition from {:?}", transition.state);
            return;
        };
        let delta =
            transition.reward + self.bootstrap(transition) - self.table.value_at(index);

        if self.params.lambda == 0.0 {
            *self.table.value_at_mut(index) += self.alpha * delta;
        } else {
            *self.traces.entry(index).or_insert(0.0) += 1.0;
            let decay = self.params.gamma * self.params.lambda;
            for (&slot, trace) in self.traces.iter_mut() {
                *self.table.value_at_mut(slot) += self.alpha * delta * *trace;
                *trace *= decay;
            }
        }

        if transition.done {
            self.traces.clear();
        }
    }

    fn begin_episode(&mut self, episode: u64, total_episodes: u64) {
        self.epsilon = self.params.epsilon.value(episode);
        if self.params.alpha_decay && total_episodes > 0 {
            let progress = episode as f64 / total_episodes as f64;
            self.alpha = self.params.alpha * (1.0 - progress).max(0.0);
        }
        self.traces.clear();
    }

    fn exploration(&self) -> f64 {
        self.epsilon
    }
}
