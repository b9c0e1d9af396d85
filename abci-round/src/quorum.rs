use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use abci_round_core::{consensus_threshold, AbciAppError};

/// Check that a Byzantine majority is still achievable.
///
/// Even before every vote has been delivered it can be deduced that no
/// quorum will be reached: the check fails iff the number of votes still to
/// come plus the votes of the most voted item so far is below the quorum.
///
/// # Params
/// - votes_by_participant: the vote of each participant that has voted so far
/// - nb_participants: the total number of participants
///
/// # Returns
/// [`AbciAppError::NoMajorityPossible`] if the quorum cannot be reached any
/// more, or [`AbciAppError::Internal`] if `nb_participants` is zero or smaller
/// than the number of voters.
pub fn check_majority_possible<K, V>(
    votes_by_participant: &BTreeMap<K, V>,
    nb_participants: usize,
) -> Result<(), AbciAppError>
where
    V: Hash + Eq,
{
    if nb_participants == 0 || votes_by_participant.len() > nb_participants {
        return Err(AbciAppError::internal(
            "nb_participants not consistent with votes_by_participants",
        ));
    }
    if votes_by_participant.is_empty() {
        return Ok(());
    }

    let mut nb_votes_by_item: HashMap<&V, usize> = HashMap::new();
    for vote in votes_by_participant.values() {
        *nb_votes_by_item.entry(vote).or_default() += 1;
    }
    let largest = nb_votes_by_item.values().copied().max().unwrap_or_default();
    let remaining = nb_participants - votes_by_participant.len();
    let quorum = consensus_threshold(nb_participants);

    if remaining + largest < quorum {
        return Err(AbciAppError::NoMajorityPossible {
            quorum,
            remaining,
            largest,
        });
    }
    Ok(())
}

/// Same as [`check_majority_possible`], as if `new_voter` had also voted
/// `new_vote`. The input map is left untouched.
pub fn check_majority_possible_with_new_voter<K, V>(
    votes_by_participant: &BTreeMap<K, V>,
    new_voter: K,
    new_vote: V,
    nb_participants: usize,
) -> Result<(), AbciAppError>
where
    K: Ord + Clone,
    V: Hash + Eq + Clone,
{
    if votes_by_participant.contains_key(&new_voter) {
        return Err(AbciAppError::internal("voter has already voted"));
    }
    if votes_by_participant.len() + 1 > nb_participants {
        return Err(AbciAppError::internal(
            "nb_participants not consistent with votes_by_participants",
        ));
    }

    let mut votes_by_participant = votes_by_participant.clone();
    votes_by_participant.insert(new_voter, new_vote);
    check_majority_possible(&votes_by_participant, nb_participants)
}

pub fn is_majority_possible<K, V>(votes_by_participant: &BTreeMap<K, V>, nb_participants: usize) -> bool
where
    V: Hash + Eq,
{
    check_majority_possible(votes_by_participant, nb_participants).is_ok()
}
