//! Ranked payout distribution.
//!
//! The rake and the distribution tables are policy constants of the
//! platform. They are gathered in [`PayoutPolicy`] so they read as one
//! policy input rather than scattered literals; rounding always floors and
//! any remainder stays with the house.

use crate::economy::wallet::{EconomyService, TransactionOutcome, TransactionRequest};
use crate::error::AppError;
use std::collections::HashMap;
use uuid::Uuid;

/// Fixed-point scale for the `1/(i+1)` weight fallback.
const WEIGHT_SCALE: u128 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct PayoutPolicy {
    /// House rake, in percent of the pot.
    pub rake_percent: i64,
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self { rake_percent: 3 }
    }
}

impl PayoutPolicy {
    pub fn rake(&self, total_pot: i64) -> i64 {
        total_pot * self.rake_percent / 100
    }

    /// Splits a prize pool over `ranked` finishing positions. Fixed
    /// percentage tables up to four players; beyond that the first
    /// `ceil(n/2)` positions share along normalized `1/(i+1)` weights.
    pub fn distribute(&self, prize: i64, ranked: usize) -> Vec<i64> {
        if prize <= 0 || ranked == 0 {
            return vec![0; ranked];
        }
        let percentages: Option<&[i64]> = match ranked {
            1 => Some(&[100]),
            2 => Some(&[70, 30]),
            3 => Some(&[50, 30, 20]),
            4 => Some(&[40, 30, 20, 10]),
            _ => None,
        };
        if let Some(percentages) = percentages {
            return percentages.iter().map(|p| prize * p / 100).collect();
        }

        // More than four finishers: the top half shares by 1/(i+1).
        let paid = ranked.div_ceil(2);
        let weights: Vec<u128> = (0..paid).map(|i| WEIGHT_SCALE / (i as u128 + 1)).collect();
        let total: u128 = weights.iter().sum();
        let mut amounts: Vec<i64> = weights
            .iter()
            .map(|w| (prize as u128 * w / total) as i64)
            .collect();
        amounts.resize(ranked, 0);
        amounts
    }
}

impl EconomyService {
    /// Pays a finished room out. A rake is withheld first, then the prize
    /// pool goes to the ranking when there is one, to the single winner
    /// otherwise, or is split evenly over the seats as a refund. Every
    /// credit is keyed `win:{roomId}:{userId}` so redelivery of the
    /// `GameEnded` event cannot pay twice.
    pub async fn process_game_payouts(
        &self,
        room_id: &str,
        total_pot: i64,
        seats: &HashMap<Uuid, u8>,
        winner_user_id: Option<Uuid>,
        ranking: Option<&[u8]>,
    ) -> Result<(), AppError> {
        if total_pot <= 0 || seats.is_empty() {
            return Ok(());
        }
        let policy = PayoutPolicy::default();
        let prize = total_pot - policy.rake(total_pot);

        let mut credits: Vec<(Uuid, i64)> = Vec::new();
        match ranking {
            Some(ranking) if !ranking.is_empty() => {
                let amounts = policy.distribute(prize, ranking.len());
                for (seat, amount) in ranking.iter().zip(amounts) {
                    if let Some(user_id) = seats.iter().find(|(_, s)| *s == seat).map(|(u, _)| *u)
                    {
                        credits.push((user_id, amount));
                    } else {
                        tracing::warn!(room_id, seat, "Ranked seat without a user, skipping.");
                    }
                }
            }
            _ => {
                if let Some(winner) = winner_user_id {
                    credits.push((winner, prize));
                } else {
                    // Refund semantics: everyone gets an even share.
                    let share = prize / seats.len() as i64;
                    credits.extend(seats.keys().map(|u| (*u, share)));
                }
            }
        }

        for (user_id, amount) in credits {
            if amount <= 0 {
                continue;
            }
            let req = TransactionRequest::new(user_id, amount, format!("ROOM:{room_id}:WIN"))
                .reference(format!("ROOM:{room_id}:WIN"))
                .idempotent(format!("win:{room_id}:{user_id}"));
            match self.process_transaction(&req).await? {
                TransactionOutcome::Ok { .. } | TransactionOutcome::Duplicate { .. } => {}
                other => {
                    tracing::error!(room_id, %user_id, outcome = ?other, "Payout did not apply.");
                    return Err(AppError::WalletConflict);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_player_ranked_payout_matches_the_tables() {
        let policy = PayoutPolicy::default();
        let pot = 1000;
        let rake = policy.rake(pot);
        assert_eq!(rake, 30);
        let prize = pot - rake;
        let amounts = policy.distribute(prize, 4);
        assert_eq!(amounts, vec![388, 291, 194, 97]);
        let paid: i64 = amounts.iter().sum();
        assert!(paid + rake <= pot);
    }

    #[test]
    fn small_rankings_use_their_tables() {
        let policy = PayoutPolicy::default();
        assert_eq!(policy.distribute(970, 1), vec![970]);
        assert_eq!(policy.distribute(970, 2), vec![679, 291]);
        assert_eq!(policy.distribute(1000, 3), vec![500, 300, 200]);
    }

    #[test]
    fn large_rankings_pay_the_top_half_by_harmonic_weights() {
        let policy = PayoutPolicy::default();
        let amounts = policy.distribute(1100, 6);
        assert_eq!(amounts.len(), 6);
        // ceil(6/2) = 3 paid positions with weights 1, 1/2, 1/3.
        assert_eq!(&amounts[3..], &[0, 0, 0]);
        assert_eq!(amounts[0], 600);
        assert_eq!(amounts[1], 300);
        assert_eq!(amounts[2], 199);
        assert!(amounts.windows(2).all(|w| w[0] >= w[1]));
        let paid: i64 = amounts.iter().sum();
        assert!(paid <= 1100);
    }

    #[test]
    fn five_player_rankings_pay_three_positions() {
        let policy = PayoutPolicy::default();
        let amounts = policy.distribute(1000, 5);
        assert_eq!(amounts.len(), 5);
        assert!(amounts[..3].iter().all(|a| *a > 0));
        assert_eq!(&amounts[3..], &[0, 0]);
    }

    #[test]
    fn rounding_remainders_stay_with_the_house() {
        let policy = PayoutPolicy::default();
        for prize in [1, 7, 99, 971] {
            for ranked in 1..=8 {
                let paid: i64 = policy.distribute(prize, ranked).iter().sum();
                assert!(paid <= prize, "prize {prize} ranked {ranked} paid {paid}");
            }
        }
    }
}
