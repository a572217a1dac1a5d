use super::Card;

/// Total of a hand after the Aces have been counted optimally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandValue {
    pub total: u8,
    /// At least one Ace is still counted as 11.
    pub is_soft: bool,
    pub is_bust: bool,
    pub is_blackjack: bool,
}

/// Counts every Ace as 11, then demotes Aces to 1 one at a time while the
/// total is over 21.
pub fn evaluate(cards: &[Card]) -> HandValue {
    let mut total: u16 = 0;
    let mut aces_as_eleven = 0;
    for card in cards {
        if card.is_ace() {
            total += 11;
            aces_as_eleven += 1;
        } else {
            total += card.blackjack_value() as u16;
        }
    }
    while total > 21 && aces_as_eleven > 0 {
        total -= 10;
        aces_as_eleven -= 1;
    }

    HandValue {
        total: total.min(u8::MAX as u16) as u8,
        is_soft: aces_as_eleven > 0,
        is_bust: total > 21,
        is_blackjack: cards.len() == 2 && total == 21,
    }
}

/// The cards dealt to one party during an episode.
#[derive(Debug, Clone, Default)]
pub struct Hand {
    cards: Vec<Card>,
}

impl Hand {
    pub fn new() -> Hand {
        Hand {
            cards: Vec::with_capacity(4),
        }
    }

    pub fn receive_card(&mut self, card: Card) {
        self.cards.push(card);
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// The first card received. For the dealer this is the upcard.
    pub fn upcard(&self) -> Option<&Card> {
        self.cards.first()
    }

    pub fn value(&self) -> HandValue {
        evaluate(&self.cards)
    }

    pub fn total(&self) -> u8 {
        self.value().total
    }

    pub fn is_soft(&self) -> bool {
        self.value().is_soft
    }

    pub fn is_bust(&self) -> bool {
        self.value().is_bust
    }

    pub fn is_blackjack(&self) -> bool {
        self.value().is_blackjack
    }

    pub fn clear(&mut self) {
        self.cards.clear();
    }
}
