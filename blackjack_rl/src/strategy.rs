mod gradient;
mod schedule;
mod tabular;

pub use gradient::{GradientParams, PolicyGradientAgent};
pub use schedule::EpsilonSchedule;
pub use tabular::{LearningParams, TabularAgent};

use crate::{Action, Policy, State};

/// One step of an episode as seen by a learner. `next_action` is the action the
/// behaviour policy already chose for `next_state`; it is None when `done`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub state: State,
    pub action: Action,
    pub reward: f64,
    pub next_state: State,
    pub next_action: Option<Action>,
    pub done: bool,
}

/// Anything that can play the player's side of an episode.
pub trait Agent {
    /// Picks the action for `state`. With `explore` false the choice must be
    /// deterministic.
    fn select_action(&mut self, state: &State, explore: bool) -> Action;

    /// Learns from one transition. Agents with frozen behaviour ignore it.
    fn observe(&mut self, _transition: &Transition) {}

    /// Called before training episode `episode` of `total_episodes`.
    fn begin_episode(&mut self, _episode: u64, _total_episodes: u64) {}

    /// Current exploration rate, for progress reports.
    fn exploration(&self) -> f64 {
        0.0
    }
}

impl Agent for Policy {
    /// States outside the space fall back to standing.
    fn select_action(&mut self, state: &State, _explore: bool) -> Action {
        self.action(state).unwrap_or(Action::Stand)
    }
}

/// Fixed hit/stand chart for a multi-deck game where the dealer hits soft 17.
/// Doubles become hits and surrenders become the fallback play.
pub struct BasicStrategy {
    hard_charts: [[Action; 10]; 14],
    soft_charts: [[Action; 10]; 9],
}

impl Default for BasicStrategy {
    fn default() -> Self {
        const H: Action = Action::Hit;
        const S: Action = Action::Stand;

        // Columns: dealer Ace, 2, 3, ..., 10.
        let hard_charts = [
            [H, H, H, H, H, H, H, H, H, H], // 5 and below
            [H, H, H, H, H, H, H, H, H, H],
            [H, H, H, H, H, H, H, H, H, H],
            [H, H, H, H, H, H, H, H, H, H],
            [H, H, H, H, H, H, H, H, H, H],
            [H, H, H, H, H, H, H, H, H, H],
            [H, H, H, H, H, H, H, H, H, H], // 11
            [H, H, H, S, S, S, H, H, H, H],
            [H, S, S, S, S, S, H, H, H, H],
            [H, S, S, S, S, S, H, H, H, H],
            [H, S, S, S, S, S, H, H, H, H],
            [H, S, S, S, S, S, H, H, H, H],
            [S, S, S, S, S, S, S, S, S, S], // 17
            [S, S, S, S, S, S, S, S, S, S], // 18 and above
        ];
        let soft_charts = [
            [H, H, H, H, H, H, H, H, H, H], // Ace + 2
            [H, H, H, H, H, H, H, H, H, H],
            [H, H, H, H, H, H, H, H, H, H],
            [H, H, H, H, H, H, H, H, H, H],
            [H, H, H, H, H, H, H, H, H, H],
            [H, S, S, S, S, S, S, S, H, H], // Ace + 7
            [S, S, S, S, S, S, S, S, S, S],
            [S, S, S, S, S, S, S, S, S, S],
            [S, S, S, S, S, S, S, S, S, S], // Ace + 10
        ];

        BasicStrategy {
            hard_charts,
            soft_charts,
        }
    }
}

impl BasicStrategy {
    pub fn decide(&self, state: &State) -> Action {
        let col = if state.dealer_upcard >= 11 {
            0
        } else {
            (state.dealer_upcard.max(2) - 1) as usize
        };

        if state.usable_ace {
            if state.player_total < 13 {
                // Pair of Aces.
                return Action::Hit;
            }
            let row = (state.player_total.min(21) - 13) as usize;
            self.soft_charts[row][col]
        } else {
            let row = if state.player_total <= 5 {
                0
            } else if state.player_total >= 18 {
                13
            } else {
                state.player_total - 5
            } as usize;
            self.hard_charts[row][col]
        }
    }
}

impl Agent for BasicStrategy {
    fn select_action(&mut self, state: &State, _explore: bool) -> Action {
        self.decide(state)
    }
}
