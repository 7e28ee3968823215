//! Tallying.
//!
//! Fully-homomorphic methods are counted as one Paillier product per
//! choice slot; only the per-slot sums are ever decrypted.
//! Multi-round methods (IRV, two-round, STAR, STV) decrypt the
//! individual ballot vectors between rounds, which is the single-
//! authority reading of "requires intermediate decryption". The
//! insecure methods count from their plaintext shadows where the
//! method semantics demand per-ballot knowledge.

use num_bigint::BigUint;

use mrec_paillier::PaillierPrivateKey;

use crate::audit::AuditEvent;
use crate::encoder::VoteIntent;
use crate::method::{SecurityLevel, VotingMethod};
use crate::poll::Poll;
use crate::VoteError;

/// One round of a multi-round tally. Tally vectors are always full
/// length; eliminated candidates sit at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyRound {
    pub tallies: Vec<u64>,
    pub eliminated: Option<usize>,
    pub elected: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResults {
    pub method: VotingMethod,
    /// Final per-choice tallies (last-round tallies for multi-round
    /// methods).
    pub tallies: Vec<u64>,
    /// The single winner, when one exists.
    pub winner: Option<usize>,
    /// The tied leaders when no single winner exists.
    pub winners: Option<Vec<usize>>,
    /// Per-round breakdown; empty for single-round methods.
    pub rounds: Vec<TallyRound>,
    /// Seats filled, in election order; STV only.
    pub elected: Vec<usize>,
}

/// Holds the authority's Paillier private key. The poll itself only
/// ever sees the public half.
pub struct PollTallier {
    private_key: PaillierPrivateKey,
}

impl PollTallier {
    pub fn new(private_key: PaillierPrivateKey) -> Self {
        Self { private_key }
    }

    /// Tally a closed poll and record the `tally_computed` audit
    /// event.
    pub fn tally(&self, poll: &mut Poll) -> Result<PollResults, VoteError> {
        if !poll.is_closed() {
            return Err(VoteError::NotClosed);
        }
        let choice_count = poll.choices().len();
        let method = poll.method();

        let mut results = match method.security_level() {
            SecurityLevel::FullyHomomorphic => {
                let tallies = self.homomorphic_tallies(poll, choice_count)?;
                let (winner, winners) = leaders(&tallies);
                let mut results = PollResults {
                    method,
                    tallies,
                    winner,
                    winners,
                    rounds: Vec::new(),
                    elected: Vec::new(),
                };
                if method == VotingMethod::Supermajority {
                    apply_supermajority(poll, &mut results);
                }
                results
            }
            SecurityLevel::MultiRound => {
                let ballots = self.decrypt_ballots(poll)?;
                match method {
                    VotingMethod::RankedChoice => irv(&ballots, choice_count, method),
                    VotingMethod::TwoRound => two_round(&ballots, choice_count, method),
                    VotingMethod::Star => star(&ballots, choice_count, method),
                    VotingMethod::Stv => stv(&ballots, choice_count, poll.seats, method),
                    _ => unreachable!("partition covers every multi-round method"),
                }
            }
            SecurityLevel::Insecure => {
                // quadratic voice is rooted per ballot, which no
                // additive fold can express; the other two keep the
                // homomorphic per-choice counts as their tallies
                let tallies = match method {
                    VotingMethod::Quadratic => quadratic_tallies(poll, choice_count),
                    _ => self.homomorphic_tallies(poll, choice_count)?,
                };
                insecure_results(poll, tallies, method)
            }
        };

        // exact ties leave the winner undefined
        if results.winner.is_some() {
            results.winners = None;
        }

        let payload = poll.tally_payload(&results.tallies);
        let authority = poll.authority_id().to_vec();
        poll.audit_append(AuditEvent::TallyComputed, &authority, &payload);
        tracing::debug!(winner = ?results.winner, "tally computed");

        Ok(results)
    }

    /// Per-slot homomorphic sums, seeded with the additive identity
    /// so an empty poll decrypts to all zeros.
    fn homomorphic_tallies(
        &self,
        poll: &Poll,
        choice_count: usize,
    ) -> Result<Vec<u64>, VoteError> {
        let public = self.private_key.public();
        let mut tallies = Vec::with_capacity(choice_count);
        for slot in 0..choice_count {
            let mut accumulator = public.zero_ciphertext();
            for (_, vote) in poll.encrypted_votes() {
                accumulator = public.add(&accumulator, &vote.ciphertexts[slot]);
            }
            tallies.push(to_u64(self.private_key.decrypt(&accumulator)?));
        }
        Ok(tallies)
    }

    /// Decrypt every ballot's slot vector. Multi-round methods only.
    fn decrypt_ballots(&self, poll: &Poll) -> Result<Vec<Vec<u64>>, VoteError> {
        poll.encrypted_votes()
            .iter()
            .map(|(_, vote)| {
                vote.ciphertexts
                    .iter()
                    .map(|ciphertext| Ok(to_u64(self.private_key.decrypt(ciphertext)?)))
                    .collect()
            })
            .collect()
    }
}

fn to_u64(value: BigUint) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Highest-tally candidates: a unique leader, or the tied set.
fn leaders(tallies: &[u64]) -> (Option<usize>, Option<Vec<usize>>) {
    let Some(max) = tallies.iter().copied().max() else {
        return (None, None);
    };
    let leaders: Vec<usize> = tallies
        .iter()
        .enumerate()
        .filter(|(_, &tally)| tally == max)
        .map(|(index, _)| index)
        .collect();
    if leaders.len() == 1 {
        (Some(leaders[0]), None)
    } else {
        (None, Some(leaders))
    }
}

/// Supermajority: the plurality winner must also clear the fractional
/// threshold, `winnerTally * denominator >= total * numerator`.
fn apply_supermajority(poll: &Poll, results: &mut PollResults) {
    let Some(winner) = results.winner else {
        return;
    };
    let config = poll.supermajority;
    let total: u64 = results.tallies.iter().sum();
    if (results.tallies[winner] as u128 * config.denominator as u128)
        < total as u128 * config.numerator as u128
    {
        results.winner = None;
        results.winners = None;
    }
}

/// Candidates of one ballot in preference order. Slot values are
/// one-based rank positions, zero meaning unranked.
fn preference_order(slots: &[u64]) -> Vec<usize> {
    let mut ranked: Vec<(u64, usize)> = slots
        .iter()
        .enumerate()
        .filter(|(_, &rank)| rank > 0)
        .map(|(candidate, &rank)| (rank, candidate))
        .collect();
    ranked.sort();
    ranked.into_iter().map(|(_, candidate)| candidate).collect()
}

/// Instant-runoff: eliminate the weakest first preference until a
/// candidate holds a majority of continuing ballots.
fn irv(ballots: &[Vec<u64>], choice_count: usize, method: VotingMethod) -> PollResults {
    let preferences: Vec<Vec<usize>> = ballots.iter().map(|b| preference_order(b)).collect();
    let mut active = vec![true; choice_count];
    let mut rounds = Vec::new();

    loop {
        let mut tallies = vec![0u64; choice_count];
        let mut continuing = 0u64;
        for preference in &preferences {
            if let Some(&candidate) = preference.iter().find(|&&c| active[c]) {
                tallies[candidate] += 1;
                continuing += 1;
            }
        }

        let remaining: Vec<usize> = (0..choice_count).filter(|&c| active[c]).collect();
        let leader = remaining
            .iter()
            .copied()
            .max_by(|&a, &b| tallies[a].cmp(&tallies[b]).then(b.cmp(&a)))
            .expect("at least one active candidate");

        let majority = tallies[leader] * 2 > continuing;
        if majority || remaining.len() == 1 || continuing == 0 {
            let winner = (majority || remaining.len() == 1).then_some(leader);
            rounds.push(TallyRound {
                tallies: tallies.clone(),
                eliminated: None,
                elected: winner.into_iter().collect(),
            });
            return PollResults {
                method,
                tallies,
                winner,
                winners: None,
                rounds,
                elected: Vec::new(),
            };
        }

        // lowest count, lowest index on ties
        let loser = remaining
            .iter()
            .copied()
            .min_by(|&a, &b| tallies[a].cmp(&tallies[b]).then(a.cmp(&b)))
            .expect("at least one active candidate");
        active[loser] = false;
        rounds.push(TallyRound {
            tallies,
            eliminated: Some(loser),
            elected: Vec::new(),
        });
    }
}

/// Plurality with a runoff between the top two when nobody holds a
/// majority.
fn two_round(ballots: &[Vec<u64>], choice_count: usize, method: VotingMethod) -> PollResults {
    let mut first = vec![0u64; choice_count];
    for ballot in ballots {
        if let Some(choice) = ballot.iter().position(|&v| v > 0) {
            first[choice] += 1;
        }
    }
    let total: u64 = first.iter().sum();
    let mut rounds = vec![TallyRound {
        tallies: first.clone(),
        eliminated: None,
        elected: Vec::new(),
    }];

    let by_strength = ranked_by_tally(&first);
    let leader = by_strength[0];
    if first[leader] * 2 > total {
        return PollResults {
            method,
            tallies: first.clone(),
            winner: Some(leader),
            winners: None,
            rounds,
            elected: Vec::new(),
        };
    }

    let finalists = [by_strength[0], by_strength[1]];
    let mut second = vec![0u64; choice_count];
    for ballot in ballots {
        if let Some(choice) = ballot.iter().position(|&v| v > 0) {
            if finalists.contains(&choice) {
                second[choice] += 1;
            }
        }
    }
    rounds.push(TallyRound {
        tallies: second.clone(),
        eliminated: None,
        elected: Vec::new(),
    });

    let winner = if second[finalists[0]] == second[finalists[1]] {
        finalists[0].min(finalists[1])
    } else if second[finalists[0]] > second[finalists[1]] {
        finalists[0]
    } else {
        finalists[1]
    };

    PollResults {
        method,
        tallies: second,
        winner: Some(winner),
        winners: None,
        rounds,
        elected: Vec::new(),
    }
}

/// Score round selects the top two; the automatic runoff counts which
/// of the two each ballot scored higher.
fn star(ballots: &[Vec<u64>], choice_count: usize, method: VotingMethod) -> PollResults {
    let mut scores = vec![0u64; choice_count];
    for ballot in ballots {
        for (slot, &score) in ballot.iter().enumerate() {
            scores[slot] += score;
        }
    }
    let by_strength = ranked_by_tally(&scores);
    let (a, b) = (by_strength[0], by_strength[1]);

    let mut runoff = vec![0u64; choice_count];
    for ballot in ballots {
        if ballot[a] > ballot[b] {
            runoff[a] += 1;
        } else if ballot[b] > ballot[a] {
            runoff[b] += 1;
        }
    }

    let winner = if runoff[a] == runoff[b] {
        a.min(b)
    } else if runoff[a] > runoff[b] {
        a
    } else {
        b
    };

    PollResults {
        method,
        tallies: runoff.clone(),
        winner: Some(winner),
        winners: None,
        rounds: vec![
            TallyRound {
                tallies: scores,
                eliminated: None,
                elected: Vec::new(),
            },
            TallyRound {
                tallies: runoff,
                eliminated: None,
                elected: Vec::new(),
            },
        ],
        elected: Vec::new(),
    }
}

/// Single transferable vote with the Droop quota and fractional
/// surplus transfers.
fn stv(
    ballots: &[Vec<u64>],
    choice_count: usize,
    seats: usize,
    method: VotingMethod,
) -> PollResults {
    let preferences: Vec<Vec<usize>> = ballots.iter().map(|b| preference_order(b)).collect();
    let quota = (ballots.len() as f64 / (seats + 1) as f64).floor() + 1.0;

    let mut weights: Vec<f64> = vec![1.0; ballots.len()];
    let mut hopeful = vec![true; choice_count];
    let mut elected: Vec<usize> = Vec::new();
    let mut rounds = Vec::new();

    while elected.len() < seats {
        let remaining: Vec<usize> = (0..choice_count).filter(|&c| hopeful[c]).collect();
        if remaining.is_empty() {
            break;
        }
        // everyone left gets a seat once the field cannot shrink
        // below the number of open seats
        if elected.len() + remaining.len() <= seats {
            let counts = count_first_preferences(&preferences, &weights, &hopeful, choice_count);
            let mut rest = remaining.clone();
            rest.sort_by(|&a, &b| {
                counts[b]
                    .partial_cmp(&counts[a])
                    .expect("finite weights")
                    .then(a.cmp(&b))
            });
            for candidate in rest {
                hopeful[candidate] = false;
                elected.push(candidate);
            }
            rounds.push(TallyRound {
                tallies: counts.iter().map(|&c| c.round() as u64).collect(),
                eliminated: None,
                elected: elected.clone(),
            });
            break;
        }

        let counts = count_first_preferences(&preferences, &weights, &hopeful, choice_count);
        let round_tallies: Vec<u64> = counts.iter().map(|&c| c.round() as u64).collect();

        // strongest candidate at or above quota is elected and their
        // surplus transfers at fractional value
        let at_quota = remaining
            .iter()
            .copied()
            .filter(|&c| counts[c] >= quota)
            .max_by(|&a, &b| {
                counts[a]
                    .partial_cmp(&counts[b])
                    .expect("finite weights")
                    .then(b.cmp(&a))
            });

        if let Some(candidate) = at_quota {
            let factor = (counts[candidate] - quota) / counts[candidate];
            for (ballot, weight) in preferences.iter().zip(weights.iter_mut()) {
                if ballot.iter().find(|&&c| hopeful[c]) == Some(&candidate) {
                    *weight *= factor;
                }
            }
            hopeful[candidate] = false;
            elected.push(candidate);
            rounds.push(TallyRound {
                tallies: round_tallies,
                eliminated: None,
                elected: vec![candidate],
            });
        } else {
            // deadlock: eliminate the weakest, lowest index on ties
            let loser = remaining
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    counts[a]
                        .partial_cmp(&counts[b])
                        .expect("finite weights")
                        .then(a.cmp(&b))
                })
                .expect("non-empty remaining");
            hopeful[loser] = false;
            rounds.push(TallyRound {
                tallies: round_tallies,
                eliminated: Some(loser),
                elected: Vec::new(),
            });
        }
    }

    let tallies = rounds
        .last()
        .map(|round| round.tallies.clone())
        .unwrap_or_else(|| vec![0; choice_count]);
    let winner = (seats == 1).then(|| elected.first().copied()).flatten();

    PollResults {
        method,
        tallies,
        winner,
        winners: None,
        rounds,
        elected,
    }
}

fn count_first_preferences(
    preferences: &[Vec<usize>],
    weights: &[f64],
    hopeful: &[bool],
    choice_count: usize,
) -> Vec<f64> {
    let mut counts = vec![0.0f64; choice_count];
    for (preference, &weight) in preferences.iter().zip(weights) {
        if let Some(&candidate) = preference.iter().find(|&&c| hopeful[c]) {
            counts[candidate] += weight;
        }
    }
    counts
}

/// Indices ordered by tally descending, index ascending.
fn ranked_by_tally(tallies: &[u64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..tallies.len()).collect();
    order.sort_by(|&a, &b| tallies[b].cmp(&tallies[a]).then(a.cmp(&b)));
    order
}

/// Quadratic voting: a ballot's voice on an option is the square
/// root of the credits it allocated there, and the root is taken per
/// ballot before summing. Summing raw credits additively would let a
/// single deep-pocketed ballot outweigh several smaller ones, which
/// is exactly what the method exists to prevent.
fn quadratic_tallies(poll: &Poll, choice_count: usize) -> Vec<u64> {
    let mut tallies = vec![0u64; choice_count];
    for (_, vote) in poll.encrypted_votes() {
        if let VoteIntent::Quadratic { allocations } = &vote.intent {
            for (slot, &credits) in allocations.iter().enumerate() {
                tallies[slot] += integer_sqrt(credits);
            }
        }
    }
    tallies
}

fn integer_sqrt(value: u64) -> u64 {
    // float sqrt as a first guess, corrected at the boundaries where
    // the 53-bit mantissa rounds the wrong way
    let mut root = (value as f64).sqrt() as u64;
    while root.checked_mul(root).map_or(true, |squared| squared > value) {
        root -= 1;
    }
    while (root + 1)
        .checked_mul(root + 1)
        .is_some_and(|squared| squared <= value)
    {
        root += 1;
    }
    root
}

/// The insecure methods are tallied from their plaintext shadows:
/// quadratic tallies arrive pre-rooted per ballot, consensus and
/// consent keep the homomorphic per-choice counts but decide the
/// winner from the individual intents.
fn insecure_results(poll: &Poll, tallies: Vec<u64>, method: VotingMethod) -> PollResults {
    let shadows: Vec<&VoteIntent> = poll
        .encrypted_votes()
        .iter()
        .map(|(_, vote)| &vote.intent)
        .collect();

    let (winner, winners) = match method {
        VotingMethod::Quadratic => leaders(&tallies),
        VotingMethod::Consensus => {
            // consensus requires unanimity
            let mut chosen: Option<usize> = None;
            let unanimous = shadows.iter().all(|intent| {
                let VoteIntent::Consensus { choice } = intent else {
                    return false;
                };
                match chosen {
                    None => {
                        chosen = Some(*choice);
                        true
                    }
                    Some(previous) => previous == *choice,
                }
            });
            if unanimous && !shadows.is_empty() {
                (chosen, None)
            } else {
                (None, None)
            }
        }
        VotingMethod::ConsentBased => {
            // the proposal (slot zero) carries unless anyone picked a
            // different option
            let no_objection = shadows.iter().all(|intent| {
                matches!(intent, VoteIntent::ConsentBased { choice: 0 })
            });
            if no_objection && !shadows.is_empty() {
                (Some(0), None)
            } else {
                (None, None)
            }
        }
        _ => unreachable!("partition covers every insecure method"),
    };

    PollResults {
        method,
        tallies,
        winner,
        winners,
        rounds: Vec::new(),
        elected: Vec::new(),
    }
}
