//! Interest line state machine
//!
//! | From                  | online / offline                                  | unspecified |
//! |-----------------------|---------------------------------------------------|-------------|
//! | PENDING               | CANCELLED, PACKAGE_CREATED, CREATING_LOAN_PACKAGE | none        |
//! | CREATING_LOAN_PACKAGE | PACKAGE_CREATED                                   | none        |
//! | CANCELLED, SIGNED, PACKAGE_CREATED | terminal                             | terminal    |

use super::{DomainError, FlowType, InterestStatus};

/// Statuses reachable in one step from `from` on an offer of `flow`.
pub fn allowed_next(from: InterestStatus, flow: FlowType) -> &'static [InterestStatus] {
    use InterestStatus::*;

    match flow {
        FlowType::Online | FlowType::Offline => match from {
            Pending => &[Cancelled, PackageCreated, CreatingLoanPackage],
            CreatingLoanPackage => &[PackageCreated],
            Cancelled | Signed | PackageCreated => &[],
        },
        FlowType::Unspecified => &[],
    }
}

pub fn can_transition(from: InterestStatus, to: InterestStatus, flow: FlowType) -> bool {
    allowed_next(from, flow).contains(&to)
}

/// Fails with `InvalidTransition` when the move is not in the table.
pub fn ensure_transition(
    from: InterestStatus,
    to: InterestStatus,
    flow: FlowType,
) -> Result<(), DomainError> {
    if can_transition(from, to, flow) {
        Ok(())
    } else {
        Err(DomainError::InvalidTransition { from, to, flow })
    }
}
