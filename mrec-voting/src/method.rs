//! Voting methods and their security partition.

use crate::VoteError;

/// How a method can be tallied without breaking ballot secrecy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// One homomorphic sum per choice; no individual ballot is ever
    /// decrypted.
    FullyHomomorphic,
    /// Requires decrypting ballots between elimination/runoff rounds.
    MultiRound,
    /// Cannot be realised additively; tallied from plaintext shadows.
    Insecure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VotingMethod {
    Plurality,
    Approval,
    Weighted,
    Borda,
    Score,
    YesNo,
    YesNoAbstain,
    Supermajority,
    RankedChoice,
    TwoRound,
    Star,
    Stv,
    Quadratic,
    Consensus,
    ConsentBased,
}

impl VotingMethod {
    pub fn security_level(self) -> SecurityLevel {
        use VotingMethod::*;
        match self {
            Plurality | Approval | Weighted | Borda | Score | YesNo | YesNoAbstain
            | Supermajority => SecurityLevel::FullyHomomorphic,
            RankedChoice | TwoRound | Star | Stv => SecurityLevel::MultiRound,
            Quadratic | Consensus | ConsentBased => SecurityLevel::Insecure,
        }
    }

    pub fn is_insecure(self) -> bool {
        self.security_level() == SecurityLevel::Insecure
    }

    /// Wire discriminant used in canonical vote encodings.
    pub fn discriminant(self) -> u8 {
        use VotingMethod::*;
        match self {
            Plurality => 0,
            Approval => 1,
            Weighted => 2,
            Borda => 3,
            Score => 4,
            YesNo => 5,
            YesNoAbstain => 6,
            Supermajority => 7,
            RankedChoice => 8,
            TwoRound => 9,
            Star => 10,
            Stv => 11,
            Quadratic => 12,
            Consensus => 13,
            ConsentBased => 14,
        }
    }
}

/// Fractional approval threshold for supermajority polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupermajorityConfig {
    pub numerator: u64,
    pub denominator: u64,
}

impl SupermajorityConfig {
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, VoteError> {
        if denominator == 0 || numerator == 0 || numerator >= denominator {
            return Err(VoteError::InvalidSupermajority {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }
}

impl Default for SupermajorityConfig {
    fn default() -> Self {
        // the usual two-thirds rule
        Self {
            numerator: 2,
            denominator: 3,
        }
    }
}
