use std::{fmt, str::FromStr};

use rust_decimal::prelude::*;
use systemair_save::{wire_address, RawSnapshot, RegisterDescriptor};

use crate::{Error, Result};

/// A decoded register value, or one about to be written.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RegisterValue {
    Boolean(bool),
    Numeric(f64),
}

impl From<bool> for RegisterValue {
    fn from(b: bool) -> Self {
        RegisterValue::Boolean(b)
    }
}

impl From<f64> for RegisterValue {
    fn from(n: f64) -> Self {
        RegisterValue::Numeric(n)
    }
}

impl From<i32> for RegisterValue {
    fn from(n: i32) -> Self {
        RegisterValue::Numeric(n.into())
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RegisterValue::Boolean(b) => f.write_str(if b { "on" } else { "off" }),
            RegisterValue::Numeric(n) => write!(f, "{n}"),
        }
    }
}

/// `on`/`off`/`true`/`false` parse as booleans, anything else must be a number.
impl FromStr for RegisterValue {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" => Ok(RegisterValue::Boolean(true)),
            "off" | "false" => Ok(RegisterValue::Boolean(false)),
            other => other.parse().map(RegisterValue::Numeric),
        }
    }
}

/// Translates the raw word(s) of `register` into engineering units.
///
/// Registers missing from the snapshot decode to 0. So do composed registers whose high word is missing, even when
/// the low word is present.
pub fn decode(register: &RegisterDescriptor, snapshot: &RawSnapshot) -> f64 {
    let Some(mut value) = snapshot.get(register.wire_address()) else {
        return 0.0;
    };

    if register.is_boolean {
        return if value != 0 { 1.0 } else { 0.0 };
    }

    if let Some(high) = register.composed_high_address {
        let Some(high) = snapshot.get(wire_address(high)) else {
            return 0.0;
        };
        // raw words come straight from the gateway's JSON and are not range checked
        value = value.wrapping_add(high.wrapping_shl(16));
    }

    // Anything above i16::MAX is negative, so 32768 decodes as -32768. NOTE: this looks at the 16-bit range even for
    // composed values, so a signed 32-bit register would be decoded incorrectly. None of the composed registers are
    // signed.
    if register.is_signed() && value > i64::from(i16::MAX) {
        value -= 1 << 16;
    }

    value as f64 / f64::from(register.scale())
}

/// Translates `value` into the raw word to write to `register`.
///
/// Numbers are scaled, truncated towards zero and then clamped into the register's bounds. Booleans are only
/// accepted by (and only accepted for) boolean registers.
pub fn encode(register: &RegisterDescriptor, value: RegisterValue) -> Result<i64> {
    let n = match (register.is_boolean, value) {
        (true, RegisterValue::Boolean(b)) => return Ok(b.into()),
        (true, RegisterValue::Numeric(_)) => return Err(Error::InvalidBooleanValue),
        (false, RegisterValue::Boolean(_)) => return Err(Error::InvalidNumericValue(value)),
        (false, RegisterValue::Numeric(n)) => n,
    };

    if !n.is_finite() {
        return Err(Error::InvalidNumericValue(value));
    }

    let scale = register.scale();
    let mut raw = Decimal::from_f64(n)
        .and_then(|n| n.checked_mul(Decimal::from(scale)))
        .and_then(|scaled| scaled.trunc().to_i64())
        // out of range for Decimal or i64, saturate and let the bounds clamp it
        .unwrap_or_else(|| (n * f64::from(scale)).trunc() as i64);

    if let Some(min) = register.min_value {
        raw = raw.max(min.into());
    }
    if let Some(max) = register.max_value {
        raw = raw.min(max.into());
    }
    Ok(raw)
}
