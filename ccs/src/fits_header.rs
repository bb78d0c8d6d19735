//! FITS header assembly
//!
//! Each exposure's header is built from three layers: the defaults in the
//! configuration file, the cards the instrument knows (exposure length,
//! binning, filters, run numbers), and the cards the telescope returns for
//! GET_FITS. A card whose keyword is already present replaces the earlier
//! one where it stands, so later layers override earlier ones without
//! reordering the header.

use ccsmsg::{FitsCard, FitsValue};

/// Ordered set of header cards
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<FitsCard>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a card, replacing any card with the same keyword
    pub fn add(&mut self, card: FitsCard) {
        match self.cards.iter_mut().find(|c| c.keyword == card.keyword) {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
    }

    pub fn add_value(&mut self, keyword: &str, value: FitsValue, comment: &str) {
        self.add(FitsCard::new(keyword, value, comment));
    }

    pub fn extend<I: IntoIterator<Item = FitsCard>>(&mut self, cards: I) {
        for card in cards {
            self.add(card);
        }
    }

    pub fn get(&self, keyword: &str) -> Option<&FitsValue> {
        self.cards.iter().find(|c| c.keyword == keyword).map(|c| &c.value)
    }

    pub fn cards(&self) -> &[FitsCard] {
        &self.cards
    }

    pub fn into_cards(self) -> Vec<FitsCard> {
        self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
