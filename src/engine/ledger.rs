use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Credit ledger ────────────────────────────────────────────────
//
// Postings are computed against a locked account first and applied only after
// the journal record carrying them is durable. An entry that fails validation
// never touches the account.

/// Build the entry that removes `amount` credits from `account`.
pub(crate) fn prepare_debit(
    account: &CreditAccount,
    amount: Credits,
    posting: Posting,
    at: NaiveDateTime,
) -> Result<LedgerEntry, EngineError> {
    if amount <= 0 {
        return Err(EngineError::InvalidAmount(amount));
    }
    if account.balance < amount {
        return Err(EngineError::InsufficientCredit {
            required: amount,
            available: account.balance,
        });
    }
    Ok(entry(account, -amount, posting, at))
}

/// Build the entry that adds `amount` credits to `account`.
pub(crate) fn prepare_credit(
    account: &CreditAccount,
    amount: Credits,
    posting: Posting,
    at: NaiveDateTime,
) -> Result<LedgerEntry, EngineError> {
    if amount <= 0 {
        return Err(EngineError::InvalidAmount(amount));
    }
    if account.balance.checked_add(amount).is_none() {
        return Err(EngineError::LimitExceeded("credit balance overflow"));
    }
    Ok(entry(account, amount, posting, at))
}

fn entry(account: &CreditAccount, amount: Credits, posting: Posting, at: NaiveDateTime) -> LedgerEntry {
    LedgerEntry {
        id: Ulid::new(),
        owner_id: account.owner_id,
        amount,
        balance_after: account.balance + amount,
        kind: posting.kind,
        counterpart_id: posting.counterpart_id,
        booking_id: posting.booking_id,
        recorded_at: at,
    }
}

/// Apply a committed entry: adopt its balance snapshot and append it to history.
pub(crate) fn apply_entry(account: &mut CreditAccount, entry: &LedgerEntry) {
    account.balance = entry.balance_after;
    account.history.push(entry.clone());
}

/// Apply a freshly committed entry and count it. Replay uses `apply_entry` alone.
pub(crate) fn post_entry(account: &mut CreditAccount, entry: &LedgerEntry) {
    apply_entry(account, entry);
    metrics::counter!(
        crate::observability::LEDGER_ENTRIES_TOTAL,
        "kind" => crate::observability::ledger_kind_label(entry.kind)
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 1, 20)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn funded(balance: Credits) -> CreditAccount {
        let mut account = CreditAccount::new(Ulid::new());
        if balance > 0 {
            let e = prepare_credit(&account, balance, Posting::new(LedgerKind::SignupReward), at())
                .unwrap();
            apply_entry(&mut account, &e);
        }
        account
    }

    fn sum(account: &CreditAccount) -> Credits {
        account.history.iter().map(|e| e.amount).sum()
    }

    #[test]
    fn credit_then_debit_snapshots_balance() {
        let mut account = funded(10);
        let debit = prepare_debit(&account, 4, Posting::new(LedgerKind::ExchangeRequest), at())
            .unwrap();
        assert_eq!(debit.amount, -4);
        assert_eq!(debit.balance_after, 6);
        assert_eq!(account.balance, 10, "prepare must not mutate");

        apply_entry(&mut account, &debit);
        assert_eq!(account.balance, 6);
        assert_eq!(account.history.len(), 2);
        assert_eq!(sum(&account), account.balance);
    }

    #[test]
    fn debit_cannot_overdraw() {
        let account = funded(3);
        let err = prepare_debit(&account, 4, Posting::new(LedgerKind::ExchangeRequest), at())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientCredit {
                required: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn debit_to_exactly_zero_is_allowed() {
        let mut account = funded(2);
        let e = prepare_debit(&account, 2, Posting::new(LedgerKind::ExchangeRequest), at()).unwrap();
        apply_entry(&mut account, &e);
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn non_positive_amounts_rejected() {
        let account = funded(5);
        for amount in [0, -3] {
            assert!(matches!(
                prepare_credit(&account, amount, Posting::new(LedgerKind::ProfileReward), at()),
                Err(EngineError::InvalidAmount(_))
            ));
            assert!(matches!(
                prepare_debit(&account, amount, Posting::new(LedgerKind::ExchangeRequest), at()),
                Err(EngineError::InvalidAmount(_))
            ));
        }
    }

    #[test]
    fn booking_postings_carry_references() {
        let account = funded(5);
        let booking = Ulid::new();
        let mentor = Ulid::new();
        let e = prepare_debit(
            &account,
            2,
            Posting::for_booking(LedgerKind::ExchangeRequest, booking, mentor),
            at(),
        )
        .unwrap();
        assert_eq!(e.booking_id, Some(booking));
        assert_eq!(e.counterpart_id, Some(mentor));
        assert_eq!(e.owner_id, account.owner_id);
    }

    #[test]
    fn invariant_holds_over_mixed_sequence() {
        let mut account = funded(0);
        let ops: [(bool, Credits); 8] = [
            (true, 10),
            (false, 3),
            (false, 8),
            (true, 1),
            (false, 8),
            (false, 1),
            (true, 5),
            (false, 5),
        ];
        for (is_credit, amount) in ops {
            let result = if is_credit {
                prepare_credit(&account, amount, Posting::new(LedgerKind::ProfileReward), at())
            } else {
                prepare_debit(&account, amount, Posting::new(LedgerKind::ExchangeRequest), at())
            };
            if let Ok(e) = result {
                apply_entry(&mut account, &e);
            }
            assert!(account.balance >= 0);
            assert_eq!(sum(&account), account.balance);
        }
        assert_eq!(account.balance, 0);
    }
}
