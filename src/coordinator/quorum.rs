//! Per-request vote accounting
//!
//! A [`Ballot`] collects replica replies for one client request under its own
//! lock. Only replies the ballot accepts count toward the threshold; the rest
//! count against it like a lost call. The first vote that brings the count to
//! the threshold decides the request; every later vote is still recorded and
//! reported as late so the caller can act on it (read-repair) without replying
//! twice.

use crate::coordinator::placement::NodeDescriptor;
use crate::protocol::ResponseType;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One replica's answer
#[derive(Debug, Clone)]
pub struct Vote {
    pub node: Arc<NodeDescriptor>,
    pub kind: ResponseType,
    pub version: u16,
    pub value: Bytes,
}

/// What a recorded vote or failure means for the request
#[derive(Debug)]
pub enum Tally {
    /// Below the threshold, still reachable
    Pending,
    /// This vote decided the request; holds every accepted vote so far
    Reached(Vec<Vote>),
    /// The threshold can no longer be met; holds the rejected votes
    Unreachable { failed: usize, rejected: Vec<Vote> },
    /// Already decided. Holds the highest-version accepted vote when this
    /// vote was itself accepted.
    Late(Option<Vote>),
}

#[derive(Debug, Default)]
struct BallotState {
    accepted: Vec<Vote>,
    rejected: Vec<Vote>,
    failures: usize,
    decided: bool,
    winner: Option<Vote>,
}

#[derive(Debug)]
pub struct Ballot {
    threshold: usize,
    targets: usize,
    accepts: fn(ResponseType) -> bool,
    state: Mutex<BallotState>,
}

impl Ballot {
    pub fn new(threshold: usize, targets: usize, accepts: fn(ResponseType) -> bool) -> Self {
        Self {
            threshold,
            targets,
            accepts,
            state: Mutex::new(BallotState::default()),
        }
    }

    /// Ballot for a PUT: only stored values count
    pub fn for_put(threshold: usize, targets: usize) -> Self {
        Self::new(threshold, targets, |kind| kind == ResponseType::Successful)
    }

    /// Ballot for a REMOVE: a replica without the key already agrees
    pub fn for_remove(threshold: usize, targets: usize) -> Self {
        Self::new(threshold, targets, |kind| {
            matches!(kind, ResponseType::Successful | ResponseType::NonExistentKey)
        })
    }

    /// Ballot for a GET: any answer about the key counts
    pub fn for_get(threshold: usize, targets: usize) -> Self {
        Self::for_remove(threshold, targets)
    }

    fn state(&self) -> MutexGuard<'_, BallotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn targets(&self) -> usize {
        self.targets
    }

    pub fn record(&self, vote: Vote) -> Tally {
        let mut state = self.state();
        if !(self.accepts)(vote.kind) {
            state.rejected.push(vote);
            return self.check_reachable(&mut state);
        }

        state.accepted.push(vote);
        if state.decided {
            return Tally::Late(state.winner.clone());
        }
        if state.accepted.len() >= self.threshold {
            state.decided = true;
            state.winner = highest_version(&state.accepted).cloned();
            return Tally::Reached(state.accepted.clone());
        }
        Tally::Pending
    }

    pub fn record_failure(&self) -> Tally {
        let mut state = self.state();
        state.failures += 1;
        self.check_reachable(&mut state)
    }

    fn check_reachable(&self, state: &mut BallotState) -> Tally {
        if state.decided {
            return Tally::Late(None);
        }
        let lost = state.failures + state.rejected.len();
        if lost > self.targets.saturating_sub(self.threshold) {
            state.decided = true;
            return Tally::Unreachable {
                failed: state.failures,
                rejected: state.rejected.clone(),
            };
        }
        Tally::Pending
    }
}

/// Combined status of a decided write: any success wins, else the key was
/// already absent everywhere.
pub fn write_outcome(votes: &[Vote]) -> ResponseType {
    if votes.iter().any(|v| v.kind == ResponseType::Successful) {
        ResponseType::Successful
    } else {
        ResponseType::NonExistentKey
    }
}

/// Most common reason a request could not gather its quorum.
///
/// Lost calls count as `None`. Ties go to a store's own answer over a lost call.
pub fn dominant_rejection(rejected: &[Vote], failed: usize) -> Option<ResponseType> {
    let mut best: Option<(usize, ResponseType)> = None;
    for vote in rejected {
        let count = rejected.iter().filter(|v| v.kind == vote.kind).count();
        if best.map_or(true, |(n, _)| count > n) {
            best = Some((count, vote.kind));
        }
    }
    match best {
        Some((count, kind)) if count >= failed => Some(kind),
        _ => None,
    }
}

pub fn highest_version(votes: &[Vote]) -> Option<&Vote> {
    votes.iter().max_by_key(|v| v.version)
}
