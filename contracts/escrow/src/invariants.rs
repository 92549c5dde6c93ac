use crate::{Escrow, EscrowStatus};

/// Hot-path check run before every escrow write. Panics (aborting the
/// invocation) on a violation.
pub(crate) fn assert_escrow(escrow: &Escrow) {
    if escrow.amount < 0 {
        panic!("Invariant violated: amount must be non-negative");
    }
    if escrow.remaining_amount < 0 {
        panic!("Invariant violated: remaining_amount must be non-negative");
    }
    if escrow.remaining_amount > escrow.amount {
        panic!("Invariant violated: remaining_amount cannot exceed amount");
    }
    if is_settled(&escrow.status) && escrow.remaining_amount != 0 {
        panic!("Invariant violated: settled escrow must have zero remaining amount");
    }
    if outstanding_ticket_amount(escrow) > escrow.remaining_amount {
        panic!("Invariant violated: open claim tickets exceed remaining amount");
    }
}

/// Per-record sanity used by the invariant checker. Refund coherence is
/// counted separately by [`verify_refund_consistency`].
pub(crate) fn verify_escrow_invariants(escrow: &Escrow) -> bool {
    if escrow.amount < 0 || escrow.remaining_amount < 0 {
        return false;
    }
    if escrow.remaining_amount > escrow.amount {
        return false;
    }
    if escrow.status == EscrowStatus::FullyReleased && escrow.remaining_amount != 0 {
        return false;
    }
    let claimed = claimed_ticket_amount(escrow);
    claimed <= escrow.amount - escrow.remaining_amount
}

pub(crate) fn verify_refund_consistency(escrow: &Escrow) -> bool {
    escrow.status != EscrowStatus::Refunded || escrow.remaining_amount == 0
}

/// Records in these states still hold funds in custody.
pub(crate) fn holds_custody(status: &EscrowStatus) -> bool {
    matches!(
        status,
        EscrowStatus::Active | EscrowStatus::PartiallyReleased | EscrowStatus::Expired
    )
}

fn is_settled(status: &EscrowStatus) -> bool {
    matches!(status, EscrowStatus::FullyReleased | EscrowStatus::Refunded)
}

/// Sum of tickets not yet claimed, regardless of expiry.
pub(crate) fn outstanding_ticket_amount(escrow: &Escrow) -> i128 {
    escrow
        .claim_tickets
        .iter()
        .filter(|t| !t.claimed)
        .fold(0_i128, |acc, t| acc.saturating_add(t.amount))
}

fn claimed_ticket_amount(escrow: &Escrow) -> i128 {
    escrow
        .claim_tickets
        .iter()
        .filter(|t| t.claimed)
        .fold(0_i128, |acc, t| acc.saturating_add(t.amount))
}
