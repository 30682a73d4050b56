mod cents;
mod helpers;
mod rate;

pub mod op;
mod secret;

pub use cents::{Cents, CentsConversionError, DEFAULT_CURRENCY_CODE};
pub use helpers::parse_boolean_flag;
pub use rate::{div_round_half_even, Rate, RateConversionError, PPM_SCALE};
pub use secret::Secret;
