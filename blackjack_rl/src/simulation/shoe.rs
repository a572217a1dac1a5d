use crate::{BlackjackError, Result};

use super::{Card, Suit};

use strum::IntoEnumIterator;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

const CARDS_PER_DECK: usize = 52;

/// Represents a shoe in the real world, together with the Hi-Lo running count of
/// the cards dealt from it since the last shuffle.
#[derive(Debug, Clone)]
pub struct Shoe {
    number_of_decks: u8,
    penetration: f64,
    cards: Vec<Card>,
    current_index: usize,
    running_count: i32,
    rng: StdRng,
}

impl Shoe {
    /// Creates a new shoe with ordered cards. Call `reshuffle` before dealing.
    pub fn new(number_of_decks: u8, penetration: f64, rng: StdRng) -> Result<Shoe> {
        if number_of_decks == 0 {
            return Err(BlackjackError::InvalidConfig(String::from(
                "a shoe needs at least one deck",
            )));
        }
        validate_penetration(penetration)?;
        Ok(Shoe {
            number_of_decks,
            penetration,
            cards: ordered_cards(number_of_decks),
            current_index: 0,
            running_count: 0,
            rng,
        })
    }

    /// Creates a shoe that deals exactly the given cards in order. A later
    /// `reshuffle` replaces them with full standard decks.
    pub fn with_cards(cards: Vec<Card>, penetration: f64) -> Result<Shoe> {
        validate_penetration(penetration)?;
        let number_of_decks = cards.len().div_ceil(CARDS_PER_DECK).max(1);
        let number_of_decks = u8::try_from(number_of_decks).map_err(|_| {
            BlackjackError::InvalidConfig(String::from("too many cards for one shoe"))
        })?;
        Ok(Shoe {
            number_of_decks,
            penetration,
            cards,
            current_index: 0,
            running_count: 0,
            rng: rand::SeedableRng::seed_from_u64(0),
        })
    }

    /// Returns all cards into the shoe, shuffles and resets the count.
    pub fn reshuffle(&mut self) {
        self.cards = ordered_cards(self.number_of_decks);
        self.cards.shuffle(&mut self.rng);
        self.current_index = 0;
        self.running_count = 0;
        log::debug!("reshuffled {} decks", self.number_of_decks);
    }

    /// Deals the next card and adds its Hi-Lo tag to the running count.
    pub fn deal(&mut self) -> Result<Card> {
        let card = *self
            .cards
            .get(self.current_index)
            .ok_or(BlackjackError::ShoeExhausted {
                dealt: self.current_index,
            })?;
        self.current_index += 1;
        self.running_count += card.hi_lo() as i32;
        Ok(card)
    }

    /// Checks if the dealt fraction has reached the penetration.
    pub fn needs_reshuffle(&self) -> bool {
        self.current_index as f64 >= self.penetration * self.cards.len() as f64
    }

    pub fn running_count(&self) -> i32 {
        self.running_count
    }

    pub fn cards_remaining(&self) -> usize {
        self.cards.len() - self.current_index
    }

    pub fn cards_dealt(&self) -> usize {
        self.current_index
    }

    pub fn decks_remaining(&self) -> f64 {
        self.cards_remaining() as f64 / CARDS_PER_DECK as f64
    }

    /// Running count per remaining deck. The divisor never drops below one deck.
    pub fn exact_true_count(&self) -> f64 {
        self.running_count as f64 / self.decks_remaining().max(1.0)
    }

    /// True count rounded half away from zero.
    pub fn true_count(&self) -> i32 {
        self.exact_true_count().round() as i32
    }

    pub fn number_of_decks(&self) -> u8 {
        self.number_of_decks
    }

    /// Rebuilds the shoe as if a number of whole decks had already been dealt with
    /// a Hi-Lo sum of `target` per remaining deck, so that `true_count()` returns
    /// `target` right away. The dealt part stays below the penetration.
    pub fn stack_true_count(&mut self, target: i32) -> Result<()> {
        let decks = self.number_of_decks as usize;
        let total_cards = decks * CARDS_PER_DECK;
        let pool = 20 * decks;
        let neutral_pool = 12 * decks;

        let candidates: Vec<usize> = (1..=decks)
            .filter(|&remaining| {
                let dealt = (decks - remaining) * CARDS_PER_DECK;
                let count = target.unsigned_abs() as usize * remaining;
                let filler = dealt.saturating_sub(count);
                (dealt as f64) < self.penetration * total_cards as f64
                    && count <= dealt
                    && count <= pool
                    && filler <= neutral_pool + 2 * (pool - count)
            })
            .collect();
        let remaining = *candidates.choose(&mut self.rng).ok_or_else(|| {
            BlackjackError::InvalidConfig(format!(
                "cannot stack a true count of {} into {} decks",
                target, decks
            ))
        })?;

        let (mut low, mut neutral, mut high) = (Vec::new(), Vec::new(), Vec::new());
        for card in ordered_cards(self.number_of_decks) {
            match card.hi_lo() {
                1 => low.push(card),
                0 => neutral.push(card),
                _ => high.push(card),
            }
        }
        low.shuffle(&mut self.rng);
        neutral.shuffle(&mut self.rng);
        high.shuffle(&mut self.rng);

        let dealt_cards = (decks - remaining) * CARDS_PER_DECK;
        let count = target.unsigned_abs() as usize * remaining;
        let mut dealt = Vec::with_capacity(dealt_cards);
        let source = if target >= 0 { &mut low } else { &mut high };
        dealt.extend(source.drain(source.len() - count..));

        let mut to_fill = dealt_cards - count;
        if to_fill % 2 == 1 {
            dealt.extend(neutral.pop());
            to_fill -= 1;
        }
        // Neutral pairs and low/high pairs keep the count unchanged.
        while to_fill > 0 {
            let neutral_pair = neutral.len() >= 2;
            let mixed_pair = !low.is_empty() && !high.is_empty();
            let take_neutral = match (neutral_pair, mixed_pair) {
                (true, true) => self.rng.gen_bool(0.5),
                (true, false) => true,
                (false, true) => false,
                (false, false) => {
                    return Err(BlackjackError::InvalidConfig(format!(
                        "ran out of count-neutral cards stacking a true count of {}",
                        target
                    )))
                }
            };
            if take_neutral {
                dealt.extend(neutral.drain(neutral.len() - 2..));
            } else {
                dealt.extend(low.pop());
                dealt.extend(high.pop());
            }
            to_fill -= 2;
        }

        let mut rest: Vec<Card> = low.into_iter().chain(neutral).chain(high).collect();
        rest.shuffle(&mut self.rng);

        self.running_count = dealt.iter().map(|card| card.hi_lo() as i32).sum();
        self.current_index = dealt.len();
        self.cards = dealt;
        self.cards.extend(rest);
        log::debug!(
            "stacked shoe: {} decks remaining, running count {}",
            remaining,
            self.running_count
        );

        if self.true_count() != target {
            return Err(BlackjackError::InvalidConfig(format!(
                "stacked true count {} does not match {}",
                self.true_count(),
                target
            )));
        }
        Ok(())
    }
}

fn validate_penetration(penetration: f64) -> Result<()> {
    if penetration > 0.0 && penetration < 1.0 {
        Ok(())
    } else {
        Err(BlackjackError::InvalidConfig(format!(
            "penetration must be in (0, 1), got {}",
            penetration
        )))
    }
}

fn ordered_cards(number_of_decks: u8) -> Vec<Card> {
    let mut cards = Vec::with_capacity(number_of_decks as usize * CARDS_PER_DECK);
    for _ in 0..number_of_decks {
        for suit in Suit::iter() {
            for face_value in 1..=13 {
                cards.push(Card { face_value, suit });
            }
        }
    }
    cards
}
