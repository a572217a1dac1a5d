use std::collections::BTreeMap;
use std::fs;
use std::ops::{Index, IndexMut};
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{Action, BlackjackError, Result};

pub const PLAYER_TOTAL_MIN: u8 = 4;
pub const PLAYER_TOTAL_MAX: u8 = 21;
pub const DEALER_UPCARD_MIN: u8 = 2;
/// An Ace upcard is 11.
pub const DEALER_UPCARD_MAX: u8 = 11;
pub const DEFAULT_TRUE_COUNT_LIMIT: i8 = 6;
const MAX_TRUE_COUNT_LIMIT: i8 = 20;

const PLAYER_TOTALS: usize = (PLAYER_TOTAL_MAX - PLAYER_TOTAL_MIN + 1) as usize;
const DEALER_UPCARDS: usize = (DEALER_UPCARD_MAX - DEALER_UPCARD_MIN + 1) as usize;

/// The discretized situation the agent acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State {
    pub player_total: u8,
    pub dealer_upcard: u8,
    pub usable_ace: bool,
    pub true_count_bucket: i8,
}

/// Bounds of the discretized state space. Player totals and dealer upcards are
/// fixed; true counts are clamped into `[-limit, limit]`, so the two outer
/// buckets also hold every count beyond them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSpace {
    true_count_limit: i8,
}

impl Default for StateSpace {
    fn default() -> Self {
        Self {
            true_count_limit: DEFAULT_TRUE_COUNT_LIMIT,
        }
    }
}

impl StateSpace {
    pub fn new(true_count_limit: i8) -> Result<Self> {
        if !(1..=MAX_TRUE_COUNT_LIMIT).contains(&true_count_limit) {
            return Err(BlackjackError::InvalidConfig(format!(
                "true_count_limit must be in [1, {}], got {}",
                MAX_TRUE_COUNT_LIMIT, true_count_limit
            )));
        }
        Ok(Self { true_count_limit })
    }

    pub fn true_count_limit(&self) -> i8 {
        self.true_count_limit
    }

    pub fn bucket(&self, true_count: i32) -> i8 {
        let limit = self.true_count_limit as i32;
        true_count.clamp(-limit, limit) as i8
    }

    pub fn buckets(&self) -> std::ops::RangeInclusive<i8> {
        -self.true_count_limit..=self.true_count_limit
    }

    fn bucket_count(&self) -> usize {
        2 * self.true_count_limit as usize + 1
    }

    pub fn number_of_states(&self) -> usize {
        PLAYER_TOTALS * DEALER_UPCARDS * 2 * self.bucket_count()
    }

    pub fn contains(&self, state: &State) -> bool {
        (PLAYER_TOTAL_MIN..=PLAYER_TOTAL_MAX).contains(&state.player_total)
            && (DEALER_UPCARD_MIN..=DEALER_UPCARD_MAX).contains(&state.dealer_upcard)
            && self.buckets().contains(&state.true_count_bucket)
    }

    /// Position of a state among all states, or None if it is outside the space.
    pub fn state_index(&self, state: &State) -> Option<usize> {
        if !self.contains(state) {
            return None;
        }
        let player = (state.player_total - PLAYER_TOTAL_MIN) as usize;
        let dealer = (state.dealer_upcard - DEALER_UPCARD_MIN) as usize;
        let ace = state.usable_ace as usize;
        let bucket = (state.true_count_bucket + self.true_count_limit) as usize;
        Some(((player * DEALER_UPCARDS + dealer) * 2 + ace) * self.bucket_count() + bucket)
    }

    /// Every state, in index order.
    pub fn states(&self) -> impl Iterator<Item = State> + '_ {
        (PLAYER_TOTAL_MIN..=PLAYER_TOTAL_MAX).flat_map(move |player_total| {
            (DEALER_UPCARD_MIN..=DEALER_UPCARD_MAX).flat_map(move |dealer_upcard| {
                [false, true].into_iter().flat_map(move |usable_ace| {
                    self.buckets().map(move |true_count_bucket| State {
                        player_total,
                        dealer_upcard,
                        usable_ace,
                        true_count_bucket,
                    })
                })
            })
        })
    }
}

/// Action-value estimates over the closed state space, stored densely.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTable {
    space: StateSpace,
    values: Vec<f64>,
}

impl ValueTable {
    pub fn new(space: StateSpace) -> ValueTable {
        ValueTable {
            space,
            values: vec![0.0; space.number_of_states() * Action::COUNT],
        }
    }

    pub fn space(&self) -> StateSpace {
        self.space
    }

    pub fn index_of(&self, state: &State, action: Action) -> Option<usize> {
        self.space
            .state_index(state)
            .map(|index| index * Action::COUNT + action.index())
    }

    pub fn get(&self, state: &State, action: Action) -> Option<f64> {
        self.index_of(state, action).map(|index| self.values[index])
    }

    pub(crate) fn value_at(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub(crate) fn value_at_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.values[index]
    }

    /// Greedy action. Ties go to the action declared first, i.e. `Stand`.
    pub fn best_action(&self, state: &State) -> Action {
        let mut best = Action::Stand;
        for action in Action::iter() {
            if self[(*state, action)] > self[(*state, best)] {
                best = action;
            }
        }
        best
    }

    pub fn max_value(&self, state: &State) -> f64 {
        Action::iter()
            .map(|action| self[(*state, action)])
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Element-wise mean of tables over the same space.
    pub fn average(tables: &[ValueTable]) -> Result<ValueTable> {
        let first = tables.first().ok_or_else(|| {
            BlackjackError::InvalidConfig(String::from("nothing to average"))
        })?;
        if tables.iter().any(|table| table.space != first.space) {
            return Err(BlackjackError::InvalidConfig(String::from(
                "cannot average tables over different state spaces",
            )));
        }
        let mut merged = ValueTable::new(first.space);
        for table in tables {
            for (sum, value) in merged.values.iter_mut().zip(&table.values) {
                *sum += value;
            }
        }
        let n = tables.len() as f64;
        for value in merged.values.iter_mut() {
            *value /= n;
        }
        Ok(merged)
    }

    pub fn policy(&self) -> Policy {
        Policy {
            space: self.space,
            actions: self.space.states().map(|state| self.best_action(&state)).collect(),
        }
    }

    /// Flat mapping from the stable key of every (state, action) pair to its value.
    pub fn to_mapping(&self) -> BTreeMap<String, f64> {
        let mut mapping = BTreeMap::new();
        for state in self.space.states() {
            for action in Action::iter() {
                mapping.insert(encode_key(&state, action), self[(state, action)]);
            }
        }
        mapping
    }

    /// Rebuilds a table from a flat mapping. Every key of the space must be present
    /// exactly once and parse; anything else is `CorruptState`.
    pub fn from_mapping(space: StateSpace, mapping: &BTreeMap<String, f64>) -> Result<ValueTable> {
        let mut table = ValueTable::new(space);
        let mut seen = vec![false; table.values.len()];
        for (key, value) in mapping {
            let (state, action) = decode_key(key)
                .ok_or_else(|| BlackjackError::CorruptState(format!("malformed key {:?}", key)))?;
            let index = table.index_of(&state, action).ok_or_else(|| {
                BlackjackError::CorruptState(format!("key {:?} is outside the state space", key))
            })?;
            if !value.is_finite() {
                return Err(BlackjackError::CorruptState(format!(
                    "non-finite value for {:?}",
                    key
                )));
            }
            table.values[index] = *value;
            seen[index] = true;
        }

        let missing = seen.iter().filter(|&&present| !present).count();
        if missing > 0 {
            let first = space
                .states()
                .flat_map(|state| Action::iter().map(move |action| (state, action)))
                .zip(&seen)
                .find(|(_, &present)| !present)
                .map(|((state, action), _)| encode_key(&state, action))
                .unwrap_or_default();
            return Err(BlackjackError::CorruptState(format!(
                "{} entries missing, first missing key {:?}",
                missing, first
            )));
        }
        Ok(table)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let persisted = PersistedTable {
            true_count_limit: self.space.true_count_limit(),
            values: self.to_mapping(),
        };
        let content = serde_json::to_string_pretty(&persisted)
            .map_err(|e| BlackjackError::CorruptState(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path.as_ref(), content)?;
        log::info!("saved value table to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<ValueTable> {
        let content = fs::read_to_string(path.as_ref())?;
        let persisted: PersistedTable = serde_json::from_str(&content)
            .map_err(|e| BlackjackError::CorruptState(e.to_string()))?;
        let space = StateSpace::new(persisted.true_count_limit)
            .map_err(|e| BlackjackError::CorruptState(e.to_string()))?;
        let table = ValueTable::from_mapping(space, &persisted.values)?;
        log::info!("loaded value table from {}", path.as_ref().display());
        Ok(table)
    }
}

impl Index<(State, Action)> for ValueTable {
    type Output = f64;
    fn index(&self, (state, action): (State, Action)) -> &Self::Output {
        let index = self
            .index_of(&state, action)
            .unwrap_or_else(|| panic!("{:?} is outside the state space", state));
        &self.values[index]
    }
}

impl IndexMut<(State, Action)> for ValueTable {
    fn index_mut(&mut self, (state, action): (State, Action)) -> &mut Self::Output {
        let index = self
            .index_of(&state, action)
            .unwrap_or_else(|| panic!("{:?} is outside the state space", state));
        &mut self.values[index]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTable {
    true_count_limit: i8,
    values: BTreeMap<String, f64>,
}

/// `p{player_total}:d{dealer_upcard}:a{0|1}:tc{bucket}:{action}`
fn encode_key(state: &State, action: Action) -> String {
    format!(
        "p{}:d{}:a{}:tc{}:{}",
        state.player_total,
        state.dealer_upcard,
        state.usable_ace as u8,
        state.true_count_bucket,
        action.name()
    )
}

fn decode_key(key: &str) -> Option<(State, Action)> {
    let mut parts = key.split(':');
    let player_total = parts.next()?.strip_prefix('p')?.parse().ok()?;
    let dealer_upcard = parts.next()?.strip_prefix('d')?.parse().ok()?;
    let usable_ace = match parts.next()?.strip_prefix('a')? {
        "0" => false,
        "1" => true,
        _ => return None,
    };
    let true_count_bucket = parts.next()?.strip_prefix("tc")?.parse().ok()?;
    let action = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((
        State {
            player_total,
            dealer_upcard,
            usable_ace,
            true_count_bucket,
        },
        action,
    ))
}

/// Greedy action for every state of a space. Read-only once derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    space: StateSpace,
    actions: Vec<Action>,
}

impl Policy {
    pub fn space(&self) -> StateSpace {
        self.space
    }

    pub fn action(&self, state: &State) -> Option<Action> {
        self.space
            .state_index(state)
            .map(|index| self.actions[index])
    }

    /// Text grid of the policy for one bucket: player totals from high to low as
    /// rows, dealer upcards 2 to Ace as columns.
    pub fn render(&self, true_count_bucket: i8, usable_ace: bool) -> String {
        let lowest = if usable_ace { 12 } else { PLAYER_TOTAL_MIN };
        let mut grid = String::from("    ");
        for upcard in DEALER_UPCARD_MIN..=DEALER_UPCARD_MAX {
            if upcard == 11 {
                grid.push_str("  A");
            } else {
                grid.push_str(&format!("{:>3}", upcard));
            }
        }
        grid.push('\n');
        for player_total in (lowest..PLAYER_TOTAL_MAX).rev() {
            grid.push_str(&format!("{:>3} ", player_total));
            for dealer_upcard in DEALER_UPCARD_MIN..=DEALER_UPCARD_MAX {
                let state = State {
                    player_total,
                    dealer_upcard,
                    usable_ace,
                    true_count_bucket,
                };
                let letter = self.action(&state).map(Action::letter).unwrap_or('?');
                grid.push_str(&format!("{:>3}", letter));
            }
            grid.push('\n');
        }
        grid
    }
}
