//! # Preset Categories
//!
//! Preset names and their indexes are scoped per population category; the
//! same name in two categories gets two independent identities.

/// A population partition within which preset identities are scoped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    /// Presets applicable to female entities.
    Female,
    /// Presets applicable to male entities.
    Male,
}

impl Category {
    /// Every category, in the order the cosave serializes category blocks.
    pub const ALL: [Self; 2] = [Self::Female, Self::Male];

    /// Returns a dense per-category storage slot.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> usize {
        match self {
            Self::Female => 0,
            Self::Male => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_slots_are_distinct() {
        assert_ne!(Category::Female.slot(), Category::Male.slot());
        assert_eq!(Category::ALL[Category::Female.slot()], Category::Female);
        assert_eq!(Category::ALL[Category::Male.slot()], Category::Male);
    }
}
