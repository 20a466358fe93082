//! Rating-ordered matchmaking pool.
//!
//! Tickets are kept in an [`RbTree`] keyed by `(rating, player_id)`. A
//! sweep walks the tree in ascending order and pairs neighbours whose
//! rating gap fits the tolerance; every ticket that survives a sweep has
//! its tolerance widened by one step, up to the configured maximum.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::rbtree::RbTree;
use crate::types::Player;

// ---------------------------------------------------------------------------
// Keys and policy
// ---------------------------------------------------------------------------

/// Ordering key of a waiting player: rating first, player id second.
#[derive(Debug, Clone)]
pub struct TicketKey {
    pub rating: f64,
    pub player_id: String,
}

impl TicketKey {
    pub fn new(player: &Player) -> Self {
        Self {
            rating: player.rating,
            player_id: player.id.clone(),
        }
    }
}

impl PartialEq for TicketKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TicketKey {}

impl PartialOrd for TicketKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TicketKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rating
            .total_cmp(&other.rating)
            .then_with(|| self.player_id.cmp(&other.player_id))
    }
}

/// How far apart two ratings may be and how that widens over time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TolerancePolicy {
    pub initial: f64,
    pub step: f64,
    pub max: f64,
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            initial: 50.0,
            step: 50.0,
            max: f64::INFINITY,
        }
    }
}

impl TolerancePolicy {
    /// A fixed tolerance that never widens.
    pub fn fixed(tolerance: f64) -> Self {
        Self {
            initial: tolerance,
            step: 0.0,
            max: tolerance,
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Ticket {
    rating: f64,
    tolerance: f64,
}

#[derive(Debug, Default)]
pub struct Pool {
    tree: RbTree<TicketKey>,
    tickets: HashMap<String, Ticket>,
    policy: TolerancePolicy,
}

impl Pool {
    pub fn new(policy: TolerancePolicy) -> Self {
        Self {
            tree: RbTree::new(),
            tickets: HashMap::new(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.tickets.contains_key(player_id)
    }

    /// Current tolerance of a waiting player.
    pub fn tolerance_of(&self, player_id: &str) -> Option<f64> {
        self.tickets.get(player_id).map(|t| t.tolerance)
    }

    /// Opens a ticket. Returns `false` if the player already waits.
    pub fn join(&mut self, player: &Player) -> bool {
        if self.tickets.contains_key(&player.id) {
            return false;
        }
        self.tree.insert(TicketKey::new(player));
        self.tickets.insert(
            player.id.clone(),
            Ticket {
                rating: player.rating,
                tolerance: self.policy.initial,
            },
        );
        true
    }

    /// Closes a ticket. Returns `false` if the player was not waiting.
    pub fn leave(&mut self, player_id: &str) -> bool {
        let Some(ticket) = self.tickets.remove(player_id) else {
            return false;
        };
        self.tree.remove(&TicketKey {
            rating: ticket.rating,
            player_id: player_id.to_string(),
        })
    }

    /// Pairs neighbours in ascending rating order, removes the paired
    /// tickets and widens the tolerance of everyone left.
    ///
    /// A pair is accepted when the gap fits the larger of the two tickets'
    /// tolerances. The lower-rated player comes first in each pair.
    pub fn sweep(&mut self) -> Vec<(Player, Player)> {
        let order: Vec<TicketKey> = self.tree.iter().cloned().collect();
        let mut pairs = Vec::new();
        let mut cursor: Option<(TicketKey, f64)> = None;

        for visited in order {
            let tolerance = self
                .tickets
                .get(&visited.player_id)
                .map_or(self.policy.initial, |t| t.tolerance);

            match cursor.take() {
                None => cursor = Some((visited, tolerance)),
                Some((waiting, waiting_tolerance)) => {
                    let gap = (visited.rating - waiting.rating).abs();
                    if gap <= waiting_tolerance.max(tolerance) {
                        self.leave(&waiting.player_id);
                        self.leave(&visited.player_id);
                        pairs.push((
                            Player::new(waiting.player_id, waiting.rating),
                            Player::new(visited.player_id, visited.rating),
                        ));
                    } else {
                        cursor = Some((visited, tolerance));
                    }
                }
            }
        }

        let TolerancePolicy { step, max, .. } = self.policy;
        for ticket in self.tickets.values_mut() {
            ticket.tolerance = (ticket.tolerance + step).min(max);
        }
        pairs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
