pub mod dealer;
pub mod hand;
pub mod shoe;

use crate::{Action, BetSizing, Result, Rule, State, StateSpace};
use blackjack_rl_macros::allowed_phase;
use rand::rngs::StdRng;
use strum_macros::EnumIter;

use self::{
    dealer::{DealerPolicy, DealerState},
    hand::Hand,
    shoe::Shoe,
};

static FACE_VALUE_TO_BLACKJACK_VALUE: [u8; 13] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 10, 10, 10];
static FACE_VALUE_TO_HI_LO: [i8; 13] = [-1, 1, 1, 1, 1, 1, 0, 0, 0, -1, -1, -1, -1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Suit {
    Diamond = 0,
    Club,
    Heart,
    Spade,
}

/// Represents a card in the real world with a suit and a face value.
/// Face values run from 1 (Ace) to 13 (King).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Card {
    pub face_value: u8,
    pub suit: Suit,
}

impl Card {
    /// A diamond of the given face value. Panics if the face value is not in [1, 13].
    pub fn new(face_value: u8) -> Card {
        if face_value == 0 || face_value > 13 {
            panic!("Invalid card face value! It must be in [1, 13]");
        }
        Card {
            face_value,
            suit: Suit::Diamond,
        }
    }

    /// Ace counts 1 here; hand evaluation decides when it is worth 11.
    pub fn blackjack_value(&self) -> u8 {
        FACE_VALUE_TO_BLACKJACK_VALUE[(self.face_value - 1) as usize]
    }

    /// Hi-Lo tag: +1 for 2-6, 0 for 7-9, -1 for tens and Aces.
    pub fn hi_lo(&self) -> i8 {
        FACE_VALUE_TO_HI_LO[(self.face_value - 1) as usize]
    }

    pub fn is_ace(&self) -> bool {
        self.face_value == 1
    }

    /// Value of the card as a dealer upcard in the agent state, where an Ace is 11.
    pub fn upcard_value(&self) -> u8 {
        if self.is_ace() {
            11
        } else {
            self.blackjack_value()
        }
    }
}

impl Default for Card {
    fn default() -> Self {
        Card {
            face_value: 1,
            suit: Suit::Diamond,
        }
    }
}

impl std::fmt::Display for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let suit = match self.suit {
            Suit::Diamond => 'D',
            Suit::Club => 'C',
            Suit::Heart => 'H',
            Suit::Spade => 'S',
        };
        let value = match self.face_value {
            1 => 'A',
            2..=9 => (b'0' + self.face_value) as char,
            10 => 'T',
            11 => 'J',
            12 => 'Q',
            13 => 'K',
            _ => panic!("Invalid card face value!"),
        };
        write!(f, "{}{}", suit, value)
    }
}

impl From<Card> for u8 {
    fn from(card: Card) -> u8 {
        card.suit as u8 * 13 + card.face_value - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    Idle,
    PlayerTurn,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Natural paid at the blackjack payout.
    Blackjack,
    Win,
    Push,
    Loss,
}

impl Outcome {
    /// Profit per unit bet.
    pub fn multiplier(self, payout_blackjack: f64) -> f64 {
        match self {
            Outcome::Blackjack => payout_blackjack,
            Outcome::Win => 1.0,
            Outcome::Push => 0.0,
            Outcome::Loss => -1.0,
        }
    }
}

/// What the agent sees after `reset` or `step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub state: State,
    pub reward: f64,
    pub done: bool,
}

/// Plays single-player hands against the dealer from a persistent shoe.
/// One call to `reset` starts an episode; `step` advances it until it is done.
pub struct Environment {
    rule: Rule,
    space: StateSpace,

    // Episode state
    phase: EpisodePhase,
    shoe: Shoe,
    dealer_hand: Hand,
    player_hand: Hand,
    bet: u32,
    starting_true_count: i32,
    outcome: Option<Outcome>,
}

impl Environment {
    pub fn new(rule: &Rule, space: StateSpace, rng: StdRng) -> Result<Self> {
        rule.validate()?;
        let mut shoe = Shoe::new(rule.number_of_decks, rule.penetration, rng)?;
        shoe.reshuffle();
        Ok(Self::with_shoe(rule, space, shoe))
    }

    /// Uses the given shoe as is, without shuffling it.
    pub fn with_shoe(rule: &Rule, space: StateSpace, shoe: Shoe) -> Self {
        Self {
            rule: *rule,
            space,
            phase: EpisodePhase::Idle,
            shoe,
            dealer_hand: Hand::new(),
            player_hand: Hand::new(),
            bet: 0,
            starting_true_count: 0,
            outcome: None,
        }
    }

    /// Starts a new episode. Reshuffles first if the cut card has been reached, sizes
    /// the bet from the true count, then deals player, dealer, player, dealer.
    /// A player natural resolves the episode immediately.
    #[allowed_phase(Idle, Finished)]
    pub fn reset<B: BetSizing + ?Sized>(&mut self, bet_rule: &B) -> Result<Observation> {
        if self.shoe.needs_reshuffle() {
            self.shoe.reshuffle();
        }
        self.dealer_hand.clear();
        self.player_hand.clear();
        self.outcome = None;

        self.starting_true_count = self.shoe.true_count();
        self.bet = bet_rule.bet(self.starting_true_count);

        for _ in 0..2 {
            let card = self.shoe.deal()?;
            self.player_hand.receive_card(card);
            let card = self.shoe.deal()?;
            self.dealer_hand.receive_card(card);
        }
        self.phase = EpisodePhase::PlayerTurn;

        if self.player_hand.is_blackjack() {
            let outcome = if self.dealer_hand.is_blackjack() {
                Outcome::Push
            } else {
                Outcome::Blackjack
            };
            return Ok(self.finish(outcome));
        }

        Ok(Observation {
            state: self.state(),
            reward: 0.0,
            done: false,
        })
    }

    /// Applies a player action. Hitting to a bust or standing ends the episode.
    #[allowed_phase(PlayerTurn)]
    pub fn step(&mut self, action: Action) -> Result<Observation> {
        match action {
            Action::Hit => {
                let card = self.shoe.deal()?;
                self.player_hand.receive_card(card);
                if self.player_hand.is_bust() {
                    return Ok(self.finish(Outcome::Loss));
                }
                Ok(Observation {
                    state: self.state(),
                    reward: 0.0,
                    done: false,
                })
            }
            Action::Stand => {
                let mut dealer = DealerPolicy::new(self.rule.dealer_hit_on_soft17);
                let dealer_state = dealer.play(&mut self.dealer_hand, &mut self.shoe)?;
                let outcome = self.settle(dealer_state);
                Ok(self.finish(outcome))
            }
        }
    }

    /// Compares a standing player hand against the finished dealer hand.
    fn settle(&self, dealer_state: DealerState) -> Outcome {
        let player = self.player_hand.value();
        let dealer = self.dealer_hand.value();

        if player.is_blackjack {
            if dealer.is_blackjack {
                Outcome::Push
            } else {
                Outcome::Blackjack
            }
        } else if dealer_state == DealerState::Bust {
            Outcome::Win
        } else if player.total > dealer.total {
            Outcome::Win
        } else if player.total < dealer.total {
            Outcome::Loss
        } else {
            Outcome::Push
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Observation {
        self.phase = EpisodePhase::Finished;
        self.outcome = Some(outcome);
        Observation {
            state: self.state(),
            reward: self.reward_for(outcome),
            done: true,
        }
    }

    fn reward_for(&self, outcome: Outcome) -> f64 {
        self.bet as f64 * outcome.multiplier(self.rule.payout_blackjack)
    }

    /// The discretized state of the current episode. The dealer upcard is the
    /// first card dealt to the dealer.
    pub fn state(&self) -> State {
        let player = self.player_hand.value();
        let dealer_upcard = self
            .dealer_hand
            .upcard()
            .map(|card| card.upcard_value())
            .unwrap_or_default();
        State {
            player_total: player.total,
            dealer_upcard,
            usable_ace: player.is_soft,
            true_count_bucket: self.space.bucket(self.shoe.true_count()),
        }
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn space(&self) -> StateSpace {
        self.space
    }

    pub fn bet(&self) -> u32 {
        self.bet
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// True count seen when the bet of the current episode was placed.
    pub fn starting_true_count(&self) -> i32 {
        self.starting_true_count
    }

    pub fn starting_bucket(&self) -> i8 {
        self.space.bucket(self.starting_true_count)
    }

    pub fn player_hand(&self) -> &Hand {
        &self.player_hand
    }

    pub fn dealer_hand(&self) -> &Hand {
        &self.dealer_hand
    }

    pub fn shoe(&self) -> &Shoe {
        &self.shoe
    }

    pub fn shoe_mut(&mut self) -> &mut Shoe {
        &mut self.shoe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlackjackError, ThresholdBet};
    use rand::SeedableRng;

    fn cards(face_values: &[u8]) -> Vec<Card> {
        face_values.iter().map(|&v| Card::new(v)).collect()
    }

    /// Deal order is player, dealer, player, dealer, then hits and dealer draws.
    fn environment_with(face_values: &[u8]) -> Environment {
        let shoe = Shoe::with_cards(cards(face_values), 0.9).unwrap();
        Environment::with_shoe(&Rule::default(), StateSpace::default(), shoe)
    }

    #[test]
    fn hi_lo_tags_of_a_deck_sum_to_zero() {
        let sum: i32 = (1..=13).map(|v| 4 * Card::new(v).hi_lo() as i32).sum();
        assert_eq!(sum, 0);
    }

    #[test]
    fn card_display() {
        assert_eq!(Card::new(1).to_string(), "DA");
        assert_eq!(Card::new(7).to_string(), "D7");
        assert_eq!(Card::new(10).to_string(), "DT");
        assert_eq!(
            Card {
                face_value: 13,
                suit: Suit::Spade
            }
            .to_string(),
            "SK"
        );
    }

    #[test]
    fn stand_on_nineteen_against_dealer_bust() {
        // Player 10, 9. Dealer 6 up, 10 hole, then draws a 10 and busts.
        let mut env = environment_with(&[10, 6, 9, 10, 10]);
        let bet = |_: i32| -> u32 { 3 };
        let observation = env.reset(&bet).unwrap();
        assert!(!observation.done);
        assert_eq!(observation.state.player_total, 19);
        assert_eq!(observation.state.dealer_upcard, 6);
        assert!(!observation.state.usable_ace);

        let observation = env.step(Action::Stand).unwrap();
        assert!(observation.done);
        assert_eq!(observation.reward, 3.0);
        assert_eq!(env.outcome(), Some(Outcome::Win));
        assert_eq!(env.dealer_hand().cards().len(), 3);
    }

    #[test]
    fn natural_pays_three_to_two_at_reset() {
        // Player Ace, King. Dealer 9, 7.
        let mut env = environment_with(&[1, 9, 13, 7]);
        let bet = |_: i32| -> u32 { 2 };
        let observation = env.reset(&bet).unwrap();
        assert!(observation.done);
        assert_eq!(observation.reward, 3.0);
        assert_eq!(env.outcome(), Some(Outcome::Blackjack));
        assert_eq!(env.phase(), EpisodePhase::Finished);
        assert!(matches!(
            env.step(Action::Hit),
            Err(BlackjackError::IllegalAction { .. })
        ));
    }

    #[test]
    fn both_naturals_push() {
        let mut env = environment_with(&[1, 10, 12, 1]);
        let observation = env.reset(&ThresholdBet::default()).unwrap();
        assert!(observation.done);
        assert_eq!(observation.reward, 0.0);
        assert_eq!(env.outcome(), Some(Outcome::Push));
    }

    #[test]
    fn hitting_to_a_bust_loses_the_bet() {
        // Player 10, 6 hits a King.
        let mut env = environment_with(&[10, 9, 6, 8, 13]);
        let bet = |_: i32| -> u32 { 5 };
        env.reset(&bet).unwrap();
        let observation = env.step(Action::Hit).unwrap();
        assert!(observation.done);
        assert_eq!(observation.reward, -5.0);
        assert_eq!(env.outcome(), Some(Outcome::Loss));
    }

    #[test]
    fn stepping_after_the_end_is_illegal() {
        let mut env = environment_with(&[10, 9, 6, 8, 13]);
        env.reset(&ThresholdBet::default()).unwrap();
        env.step(Action::Hit).unwrap();
        for action in [Action::Hit, Action::Stand] {
            match env.step(action) {
                Err(BlackjackError::IllegalAction { operation, phase }) => {
                    assert_eq!(operation, "step");
                    assert_eq!(phase, EpisodePhase::Finished);
                }
                other => panic!("expected IllegalAction, got {:?}", other),
            }
        }
    }

    #[test]
    fn stepping_before_reset_is_illegal() {
        let mut env = environment_with(&[10, 9, 6, 8]);
        assert!(matches!(
            env.step(Action::Stand),
            Err(BlackjackError::IllegalAction {
                phase: EpisodePhase::Idle,
                ..
            })
        ));
    }

    #[test]
    fn reset_during_a_hand_is_illegal() {
        let mut env = environment_with(&[10, 9, 6, 8]);
        env.reset(&ThresholdBet::default()).unwrap();
        assert!(matches!(
            env.reset(&ThresholdBet::default()),
            Err(BlackjackError::IllegalAction { .. })
        ));
    }

    #[test]
    fn equal_totals_push_even_against_a_dealer_natural() {
        // Player 10, 8 stands. Dealer 10, 8 stands.
        let mut env = environment_with(&[10, 10, 8, 8]);
        env.reset(&ThresholdBet::default()).unwrap();
        let observation = env.step(Action::Stand).unwrap();
        assert_eq!(observation.reward, 0.0);
        assert_eq!(env.outcome(), Some(Outcome::Push));

        // Player 5, 6 hits to 21 with a ten. Dealer has Ace, King.
        let mut env = environment_with(&[5, 1, 6, 13, 10]);
        env.reset(&ThresholdBet::default()).unwrap();
        let observation = env.step(Action::Hit).unwrap();
        assert!(!observation.done);
        assert_eq!(observation.state.player_total, 21);
        assert_eq!(observation.state.dealer_upcard, 11);
        let observation = env.step(Action::Stand).unwrap();
        assert!(observation.done);
        assert_eq!(observation.reward, 0.0);
        assert_eq!(env.outcome(), Some(Outcome::Push));
        assert_eq!(env.dealer_hand().cards().len(), 2);
    }

    #[test]
    fn lower_total_loses_after_dealer_stands() {
        // Player 10, 7 stands. Dealer 9, 9 stands on 18.
        let mut env = environment_with(&[10, 9, 7, 9]);
        env.reset(&ThresholdBet::default()).unwrap();
        let observation = env.step(Action::Stand).unwrap();
        assert_eq!(observation.reward, -1.0);
        assert_eq!(env.dealer_hand().cards().len(), 2);
    }

    #[test]
    fn counting_flows_across_hands_until_reshuffle() {
        let mut env = Environment::new(
            &Rule::default(),
            StateSpace::default(),
            StdRng::seed_from_u64(7),
        )
        .unwrap();
        let bet = ThresholdBet::default();
        let mut expected_count = 0;
        for _ in 0..50 {
            if env.shoe().needs_reshuffle() {
                break;
            }
            let observation = env.reset(&bet).unwrap();
            let mut done = observation.done;
            while !done {
                done = env.step(Action::Stand).unwrap().done;
            }
            expected_count += env
                .player_hand()
                .cards()
                .iter()
                .chain(env.dealer_hand().cards())
                .map(|card| card.hi_lo() as i32)
                .sum::<i32>();
            assert_eq!(env.shoe().running_count(), expected_count);
        }
    }

    #[test]
    fn bet_follows_the_true_count_before_the_deal() {
        let mut env = Environment::new(
            &Rule::default(),
            StateSpace::default(),
            StdRng::seed_from_u64(11),
        )
        .unwrap();
        env.shoe_mut().stack_true_count(3).unwrap();
        env.reset(&ThresholdBet::default()).unwrap();
        assert_eq!(env.starting_true_count(), 3);
        assert_eq!(env.starting_bucket(), 3);
        assert_eq!(env.bet(), 20);
    }
}
