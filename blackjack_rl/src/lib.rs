pub mod error;
pub mod simulation;
mod statearray;
pub mod strategy;
pub mod training;

use serde_enum_str::{Deserialize_enum_str, Serialize_enum_str};
use strum_macros::EnumIter;

pub use error::{BlackjackError, Result};
pub use statearray::{Policy, State, StateSpace, ValueTable};

/// Table rules shared by the shoe, the dealer and the settlement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub number_of_decks: u8,
    /// Fraction of the shoe dealt before a mandatory reshuffle.
    pub penetration: f64,
    pub dealer_hit_on_soft17: bool,
    pub payout_blackjack: f64,
}

impl Default for Rule {
    fn default() -> Self {
        Rule {
            number_of_decks: 6,
            penetration: 0.75,
            dealer_hit_on_soft17: true,
            payout_blackjack: 1.5,
        }
    }
}

impl Rule {
    pub fn validate(&self) -> Result<()> {
        if self.number_of_decks == 0 {
            return Err(BlackjackError::InvalidConfig(String::from(
                "number_of_decks must be at least 1",
            )));
        }
        if !(self.penetration > 0.0 && self.penetration < 1.0) {
            return Err(BlackjackError::InvalidConfig(format!(
                "penetration must be in (0, 1), got {}",
                self.penetration
            )));
        }
        if !(self.payout_blackjack.is_finite() && self.payout_blackjack > 0.0) {
            return Err(BlackjackError::InvalidConfig(format!(
                "payout_blackjack must be positive, got {}",
                self.payout_blackjack
            )));
        }
        Ok(())
    }
}

/// Player decisions. The declaration order is the tie-break priority of the
/// greedy policy: `Stand` wins ties.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    Serialize_enum_str,
    Deserialize_enum_str,
)]
pub enum Action {
    Stand = 0,
    Hit = 1,
}

impl Action {
    pub const COUNT: usize = 2;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Stand => "Stand",
            Action::Hit => "Hit",
        }
    }

    /// Single letter used by the policy grid.
    pub fn letter(self) -> char {
        match self {
            Action::Stand => 'S',
            Action::Hit => 'H',
        }
    }
}

/// Decides the stake of a hand from the true count observed before the deal.
pub trait BetSizing {
    fn bet(&self, true_count: i32) -> u32;
}

impl<F: Fn(i32) -> u32> BetSizing for F {
    fn bet(&self, true_count: i32) -> u32 {
        self(true_count)
    }
}

/// Bets `large` once the true count reaches `threshold`, otherwise `small`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdBet {
    pub large: u32,
    pub small: u32,
    pub threshold: i32,
}

impl Default for ThresholdBet {
    fn default() -> Self {
        ThresholdBet {
            large: 20,
            small: 1,
            threshold: 2,
        }
    }
}

impl ThresholdBet {
    pub fn validate(&self) -> Result<()> {
        if self.small == 0 || self.large == 0 {
            return Err(BlackjackError::InvalidConfig(String::from(
                "bets must be positive",
            )));
        }
        Ok(())
    }
}

impl BetSizing for ThresholdBet {
    fn bet(&self, true_count: i32) -> u32 {
        if true_count >= self.threshold {
            self.large
        } else {
            self.small
        }
    }
}
