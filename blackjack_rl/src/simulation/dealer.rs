use crate::Result;

use super::{hand::HandValue, hand::Hand, shoe::Shoe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealerState {
    AwaitingTurn,
    Drawing,
    /// Stood on a total of 17 or more.
    Done,
    Bust,
}

impl DealerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DealerState::Done | DealerState::Bust)
    }
}

/// Draws dealer cards until the hand stands or busts. The only randomness is
/// the order of the shoe.
#[derive(Debug, Clone)]
pub struct DealerPolicy {
    hit_soft_17: bool,
    state: DealerState,
}

impl DealerPolicy {
    pub fn new(hit_soft_17: bool) -> Self {
        Self {
            hit_soft_17,
            state: DealerState::AwaitingTurn,
        }
    }

    pub fn state(&self) -> DealerState {
        self.state
    }

    pub fn must_draw(&self, value: &HandValue) -> bool {
        if value.total < 17 {
            true
        } else if value.total > 17 {
            false
        } else {
            value.is_soft && self.hit_soft_17
        }
    }

    /// Makes one transition: draws a card, stands or busts.
    pub fn advance(&mut self, hand: &mut Hand, shoe: &mut Shoe) -> Result<DealerState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        let value = hand.value();
        self.state = if value.is_bust {
            DealerState::Bust
        } else if self.must_draw(&value) {
            hand.receive_card(shoe.deal()?);
            DealerState::Drawing
        } else {
            DealerState::Done
        };
        Ok(self.state)
    }

    /// Runs the dealer to a terminal state.
    pub fn play(&mut self, hand: &mut Hand, shoe: &mut Shoe) -> Result<DealerState> {
        loop {
            let state = self.advance(hand, shoe)?;
            if state.is_terminal() {
                return Ok(state);
            }
        }
    }
}
