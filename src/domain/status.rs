//! Status and classifier enums
//!
//! Every enum persisted as text parses through a closed match. Text that
//! does not name a variant is an `UnknownVariant` error, never a default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Declares a closed, text-backed enum with `as_str`, `Display` and `FromStr`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(DomainError::unknown_variant($kind, other)),
                }
            }
        }
    };
}

text_enum! {
    /// Lifecycle of an investor request. PENDING requests are still open for
    /// offers; CONFIRMED requests have been processed one way or another.
    RequestStatus, "request status" {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
    }
}

text_enum! {
    RequestType, "request type" {
        Flexible => "FLEXIBLE",
        Guaranteed => "GUARANTEED",
    }
}

text_enum! {
    /// Underlying requests carry loan rate and limit; derivative requests carry
    /// initial rate and contract size.
    AssetType, "asset type" {
        Underlying => "UNDERLYING",
        Derivative => "DERIVATIVE",
    }
}

text_enum! {
    /// How an offer is confirmed.
    FlowType, "flow type" {
        /// Investor self-confirms.
        Online => "ONLINE",
        /// Admin confirms on the investor's behalf.
        Offline => "OFFLINE",
        /// Offers written before the flow column existed. No transitions allowed.
        Unspecified => "UNSPECIFIED",
    }
}

text_enum! {
    InterestStatus, "offer interest status" {
        Pending => "PENDING",
        Cancelled => "CANCELLED",
        Signed => "SIGNED",
        CreatingLoanPackage => "CREATING_LOAN_PACKAGE",
        PackageCreated => "PACKAGE_CREATED",
    }
}

text_enum! {
    CancelledReason, "cancelled reason" {
        Unknown => "UNKNOWN",
        Expired => "EXPIRED",
        Investor => "INVESTOR",
        Admin => "ADMIN",
        AlternativeOption => "ALTERNATIVE_OPTION",
        HighLoanRate => "HIGH_LOAN_RATE",
    }
}

text_enum! {
    SchedulerJobType, "scheduler job type" {
        DeclineHighLoanRequests => "DECLINE_HIGH_LOAN_REQUESTS",
        ExpireOffers => "EXPIRE_OFFERS",
    }
}

text_enum! {
    SchedulerJobStatus, "scheduler job status" {
        Success => "SUCCESS",
        Fail => "FAIL",
    }
}

impl InterestStatus {
    /// The line has been taken by the investor (or on their behalf).
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            InterestStatus::Signed
                | InterestStatus::CreatingLoanPackage
                | InterestStatus::PackageCreated
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InterestStatus::Cancelled | InterestStatus::Signed | InterestStatus::PackageCreated
        )
    }
}

impl Default for CancelledReason {
    fn default() -> Self {
        CancelledReason::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_interest_status() {
        for status in InterestStatus::ALL {
            let parsed: InterestStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, *status);
        }
    }

    #[test]
    fn test_unknown_text_is_an_error() {
        let err = "ACTIVE".parse::<RequestStatus>().unwrap_err();
        assert_eq!(
            err,
            DomainError::UnknownVariant {
                kind: "request status",
                value: "ACTIVE".to_string()
            }
        );

        assert!("pending".parse::<InterestStatus>().is_err());
        assert!("".parse::<CancelledReason>().is_err());
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&CancelledReason::AlternativeOption).unwrap();
        assert_eq!(json, "\"ALTERNATIVE_OPTION\"");

        let status: InterestStatus = serde_json::from_str("\"CREATING_LOAN_PACKAGE\"").unwrap();
        assert_eq!(status, InterestStatus::CreatingLoanPackage);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(InterestStatus::Cancelled.is_terminal());
        assert!(InterestStatus::PackageCreated.is_terminal());
        assert!(InterestStatus::Signed.is_terminal());
        assert!(!InterestStatus::Pending.is_terminal());
        assert!(!InterestStatus::CreatingLoanPackage.is_terminal());
    }
}
