//! Contract matching module.
//!
//! Provides:
//! - Exact and nearest-strike contract re-matching
//! - The mid-else-last price rule
//! - Entry contract and expiry selection

pub mod matcher;
pub mod pricing;
pub mod selection;

pub use matcher::{
    match_contract, match_entry, match_exit, ContractMatch, ContractNotFoundError,
    NotFoundReason, Substitution, SubstitutionPolicy,
};
pub use pricing::{resolve_price, MissingPriceError, PriceSource, ResolvedPrice, PRICING_RULE};
pub use selection::{days_to_expiry, pick_expiries, select_contract};
