//! Account classification reported to clients after a successful login.

use super::identity::Identity;

/// Status codes above this mark a lapsed account.
const ACTIVE_STATUS_MAX: i32 = 5;
const FREE_TIERS: [i32; 2] = [0, 50];
const TRIAL_TIERS: [i32; 2] = [60, 61];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountType {
    Free = 0,
    Trial = 1,
    Standard = 2,
    Inactive = 3,
}

impl From<AccountType> for u8 {
    fn from(account_type: AccountType) -> Self {
        account_type as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub account_type: AccountType,
    /// Epoch seconds at which the subscription ends.
    pub sub_end_epoch: i64,
}

/// Derive the account type and subscription end for `identity`.
///
/// Rules apply in order and the last match wins: a lapsed status marks the
/// account inactive and ends the subscription `now`, then free and trial
/// tiers override the type.
#[must_use]
pub fn classify(identity: &Identity, now: i64) -> Classification {
    let mut account_type = AccountType::Standard;
    let mut sub_end_epoch = identity.next_cycle;

    if identity.status > ACTIVE_STATUS_MAX {
        account_type = AccountType::Inactive;
        sub_end_epoch = now;
    }

    if FREE_TIERS.contains(&identity.tier) {
        account_type = AccountType::Free;
    }

    if TRIAL_TIERS.contains(&identity.tier) {
        account_type = AccountType::Trial;
    }

    Classification {
        account_type,
        sub_end_epoch,
    }
}
