use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

pub mod accounts;
pub mod ads;
pub mod referrals;
pub mod transactions;
pub mod withdrawals;

/// Amounts leave the service without storage padding (`0.000281000` -> `0.000281`).
fn normalized<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    Serialize::serialize(&value.normalize(), serializer)
}
