//! Handshake round numbering.

use crate::error::PakeError;

/// The four rounds of the authentication handshake, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PakeRound {
    /// Initial key-agreement material exchange
    One = 1,
    /// Second key-agreement material exchange
    Two = 2,
    /// Combined-material exchange
    Three = 3,
    /// Key confirmation
    Four = 4,
}

impl PakeRound {
    /// All rounds in protocol order
    pub const ALL: [Self; 4] = [Self::One, Self::Two, Self::Three, Self::Four];

    /// Wire index of this round (1-based)
    #[must_use]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Whether this is the confirmation round
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Four)
    }

    /// The round that must follow this one, if any
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::One => Some(Self::Two),
            Self::Two => Some(Self::Three),
            Self::Three => Some(Self::Four),
            Self::Four => None,
        }
    }
}

impl TryFrom<u8> for PakeRound {
    type Error = PakeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            other => Err(PakeError::InvalidRound(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_indices() {
        assert_eq!(PakeRound::One.index(), 1);
        assert_eq!(PakeRound::Four.index(), 4);
    }

    #[test]
    fn test_round_ordering() {
        assert_eq!(PakeRound::One.next(), Some(PakeRound::Two));
        assert_eq!(PakeRound::Three.next(), Some(PakeRound::Four));
        assert_eq!(PakeRound::Four.next(), None);
    }

    #[test]
    fn test_only_round_four_is_final() {
        for round in PakeRound::ALL {
            assert_eq!(round.is_final(), round == PakeRound::Four);
        }
    }

    #[test]
    fn test_try_from_valid() {
        for round in PakeRound::ALL {
            assert_eq!(PakeRound::try_from(round.index()).unwrap(), round);
        }
    }

    #[test]
    fn test_try_from_invalid() {
        for value in [0u8, 5, 42, 255] {
            assert!(matches!(
                PakeRound::try_from(value),
                Err(PakeError::InvalidRound(v)) if v == value
            ));
        }
    }
}
