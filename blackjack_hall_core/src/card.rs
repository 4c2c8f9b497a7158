use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// --- Core card types ---

/// Suit
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum Suit {
    Spade,   // ♠
    Heart,   // ♥
    Diamond, // ♦
    Club,    // ♣
}

/// Rank
/// Blackjack only cares about the point value; splits compare ranks, never suits.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum Rank {
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

/// A single playing card
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

pub const SUITS: [Suit; 4] = [Suit::Spade, Suit::Heart, Suit::Diamond, Suit::Club];

pub const RANKS: [Rank; 13] = [
    Rank::Two, Rank::Three, Rank::Four, Rank::Five, Rank::Six, Rank::Seven,
    Rank::Eight, Rank::Nine, Rank::Ten, Rank::Jack, Rank::Queen, Rank::King, Rank::Ace,
];

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Card {
        Card { rank, suit }
    }

    /// Same rank, suit ignored.
    pub fn same_rank(&self, other: &Card) -> bool {
        self.rank == other.rank
    }
}

impl Rank {
    /// Point value with the ace counted high.
    pub fn points(&self) -> u32 {
        match self {
            Rank::Two => 2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Eight => 8,
            Rank::Nine => 9,
            Rank::Ten | Rank::Jack | Rank::Queen | Rank::King => 10,
            Rank::Ace => 11,
        }
    }
}

// --- Display ---

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", match self {
            Suit::Spade => "♠",
            Suit::Heart => "♥",
            Suit::Diamond => "♦",
            Suit::Club => "♣",
        })
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", match self {
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
            Rank::Ace => "A",
        })
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.rank, self.suit)
    }
}

/// Formats a hand as `[10♣, 9♦]`.
pub fn format_cards(cards: &[Card]) -> String {
    let inner: Vec<String> = cards.iter().map(|c| c.to_string()).collect();
    format!("[{}]", inner.join(", "))
}

// --- Hand value ---

/// Best blackjack total for `cards`.
///
/// Every ace starts at 11; aces are downgraded to 1 one at a time while the
/// total is over 21.
pub fn hand_value(cards: &[Card]) -> u32 {
    let mut total: u32 = cards.iter().map(|c| c.rank.points()).sum();
    let mut high_aces = cards.iter().filter(|c| c.rank == Rank::Ace).count();
    while total > 21 && high_aces > 0 {
        total -= 10;
        high_aces -= 1;
    }
    total
}

// --- Card sources ---

/// Where the table draws cards from.
pub trait CardSource: Send {
    fn draw(&mut self) -> Card;
}

/// Uniform draws with replacement from the 52-card space. No shoe depletion.
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn new() -> Self {
        RandomSource { rng: StdRng::from_os_rng() }
    }

    pub fn seeded(seed: u64) -> Self {
        RandomSource { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CardSource for RandomSource {
    fn draw(&mut self) -> Card {
        let rank = RANKS[self.rng.random_range(0..RANKS.len())];
        let suit = SUITS[self.rng.random_range(0..SUITS.len())];
        Card { rank, suit }
    }
}

/// Yields a scripted sequence of cards, then falls back to random draws.
pub struct StackedSource {
    cards: VecDeque<Card>,
    fallback: RandomSource,
}

impl StackedSource {
    pub fn new(cards: impl IntoIterator<Item = Card>) -> Self {
        StackedSource {
            cards: cards.into_iter().collect(),
            fallback: RandomSource::seeded(7),
        }
    }

    pub fn remaining(&self) -> usize {
        self.cards.len()
    }
}

impl CardSource for StackedSource {
    fn draw(&mut self) -> Card {
        self.cards.pop_front().unwrap_or_else(|| self.fallback.draw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::Rank::*;
    use super::Suit::*;

    fn card(rank: Rank, suit: Suit) -> Card {
        Card::new(rank, suit)
    }

    #[test]
    fn test_two_aces_are_twelve() {
        assert_eq!(hand_value(&[card(Ace, Spade), card(Ace, Heart)]), 12);
    }

    #[test]
    fn test_ace_king_is_twenty_one() {
        assert_eq!(hand_value(&[card(Ace, Spade), card(King, Heart)]), 21);
    }

    #[test]
    fn test_two_aces_and_nine_is_twenty_one() {
        assert_eq!(hand_value(&[card(Ace, Spade), card(Ace, Heart), card(Nine, Club)]), 21);
    }

    #[test]
    fn test_faces_count_ten() {
        assert_eq!(hand_value(&[card(Jack, Club), card(Queen, Diamond), card(Two, Heart)]), 22);
        assert_eq!(hand_value(&[card(Ten, Club), card(Nine, Diamond)]), 19);
    }

    #[test]
    fn test_empty_hand_is_zero() {
        assert_eq!(hand_value(&[]), 0);
    }

    #[test]
    fn test_aces_only_downgrade_while_over_21() {
        // Exhaustive over every three-card rank combination: the value never exceeds 21
        // while an ace could still drop to 1, and never drops an ace needlessly.
        for &a in &RANKS {
            for &b in &RANKS {
                for &c in &RANKS {
                    let cards = [card(a, Spade), card(b, Heart), card(c, Club)];
                    let value = hand_value(&cards);
                    let aces = cards.iter().filter(|x| x.rank == Ace).count() as u32;
                    let hard: u32 = cards.iter().map(|x| if x.rank == Ace { 1 } else { x.rank.points() }).sum();
                    assert!(value == hard || value == hard + 10, "{:?}", cards);
                    if aces > 0 && hard + 10 <= 21 {
                        assert_eq!(value, hard + 10, "ace downgraded needlessly: {:?}", cards);
                    }
                    if value > 21 {
                        assert_eq!(value, hard, "reducible total reported over 21: {:?}", cards);
                    }
                }
            }
        }
    }

    #[test]
    fn test_same_rank_ignores_suit() {
        assert!(card(Eight, Club).same_rank(&card(Eight, Diamond)));
        assert!(!card(King, Club).same_rank(&card(Queen, Club)));
    }

    #[test]
    fn test_display() {
        assert_eq!(card(Ten, Club).to_string(), "10♣");
        assert_eq!(format_cards(&[card(Ace, Spade), card(King, Heart)]), "[A♠, K♥]");
    }

    #[test]
    fn test_stacked_source_replays_then_falls_back() {
        let mut source = StackedSource::new([card(Two, Club), card(Ace, Heart)]);
        assert_eq!(source.draw(), card(Two, Club));
        assert_eq!(source.draw(), card(Ace, Heart));
        assert_eq!(source.remaining(), 0);
        let _ = source.draw();
    }

    #[test]
    fn test_random_source_covers_all_ranks() {
        let mut source = RandomSource::seeded(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2000 {
            seen.insert(source.draw().rank);
        }
        assert_eq!(seen.len(), 13);
    }
}
