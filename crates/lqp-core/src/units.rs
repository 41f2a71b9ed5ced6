//! Unit-safe wrappers for the quantities a residential feeder study handles.
//!
//! Profiles and battery ratings arrive in kW / kvar / kVA / kWh while the
//! network equations run in per-unit on the feeder's apparent-power base.
//! Keeping the engineering units in newtypes makes the conversion points
//! explicit: a `Kilowatts` value can only enter the LinDistFlow equations
//! through [`Kilowatts::to_per_unit`].
//!
//! ```
//! use lqp_core::units::{Kilowatts, KilovoltAmperes, Kilovars};
//!
//! let base = KilovoltAmperes(1000.0);
//! let p = Kilowatts(250.0);
//! assert_eq!(p.to_per_unit(base), 0.25);
//!
//! let s = p.apparent_power(Kilovars(0.0));
//! assert_eq!(s, KilovoltAmperes(250.0));
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! unit_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub f64);

        impl $name {
            pub const ZERO: Self = Self(0.0);

            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            #[inline]
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }

            #[inline]
            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }

            #[inline]
            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $name {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $name {
            type Output = Self;
            fn div(self, rhs: f64) -> Self {
                Self(self.0 / rhs)
            }
        }

        impl Div for $name {
            type Output = f64;
            fn div(self, rhs: Self) -> f64 {
                self.0 / rhs.0
            }
        }

        impl std::iter::Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.3} {}", self.0, $label)
            }
        }
    };
}

unit_type!(
    /// Active power in kilowatts. Positive means consumption for loads and
    /// production for PV; the sign convention is fixed by the owning field.
    Kilowatts,
    "kW"
);
unit_type!(
    /// Reactive power in kilovolt-amperes reactive.
    Kilovars,
    "kvar"
);
unit_type!(
    /// Apparent power in kilovolt-amperes (inverter ratings, system base).
    KilovoltAmperes,
    "kVA"
);
unit_type!(
    /// Stored energy in kilowatt-hours.
    KilowattHours,
    "kWh"
);
unit_type!(
    /// Line-to-line voltage in kilovolts.
    Kilovolts,
    "kV"
);
unit_type!(
    /// Voltage magnitude in per-unit of the bus base voltage.
    PerUnit,
    "pu"
);

impl Kilowatts {
    /// Normalize against the system apparent-power base.
    #[inline]
    pub fn to_per_unit(self, base: KilovoltAmperes) -> f64 {
        self.0 / base.0
    }

    #[inline]
    pub fn from_per_unit(value: f64, base: KilovoltAmperes) -> Self {
        Self(value * base.0)
    }

    /// Magnitude of the complex power `P + jQ`.
    #[inline]
    pub fn apparent_power(self, q: Kilovars) -> KilovoltAmperes {
        KilovoltAmperes(self.0.hypot(q.0))
    }

    /// Energy delivered by holding this power for `hours`.
    #[inline]
    pub fn over_hours(self, hours: f64) -> KilowattHours {
        KilowattHours(self.0 * hours)
    }
}

impl Kilovars {
    #[inline]
    pub fn to_per_unit(self, base: KilovoltAmperes) -> f64 {
        self.0 / base.0
    }

    #[inline]
    pub fn from_per_unit(value: f64, base: KilovoltAmperes) -> Self {
        Self(value * base.0)
    }
}

impl KilovoltAmperes {
    #[inline]
    pub fn to_per_unit(self, base: KilovoltAmperes) -> f64 {
        self.0 / base.0
    }
}

impl KilowattHours {
    /// Energy expressed in per-unit hours on the given base.
    #[inline]
    pub fn to_per_unit(self, base: KilovoltAmperes) -> f64 {
        self.0 / base.0
    }

    #[inline]
    pub fn from_per_unit(value: f64, base: KilovoltAmperes) -> Self {
        Self(value * base.0)
    }
}

impl Kilovolts {
    /// Impedance base in ohms for a three-phase system: `kV² · 1000 / kVA`.
    #[inline]
    pub fn impedance_base_ohms(self, s_base: KilovoltAmperes) -> f64 {
        self.0 * self.0 * 1000.0 / s_base.0
    }
}

impl PerUnit {
    pub const ONE: Self = Self(1.0);

    /// Squared magnitude, the variable LinDistFlow is linear in.
    #[inline]
    pub fn squared(self) -> f64 {
        self.0 * self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_unit_round_trip_on_base() {
        let base = KilovoltAmperes(500.0);
        let p = Kilowatts(125.0);
        let pu = p.to_per_unit(base);
        assert_eq!(pu, 0.25);
        assert_eq!(Kilowatts::from_per_unit(pu, base), p);
    }

    #[test]
    fn impedance_base_matches_hand_calculation() {
        // 4.16 kV, 1 MVA -> 17.3056 ohm
        let z = Kilovolts(4.16).impedance_base_ohms(KilovoltAmperes(1000.0));
        assert!((z - 17.3056).abs() < 1e-9);
    }

    #[test]
    fn energy_from_power() {
        let e = Kilowatts(3.0).over_hours(0.25);
        assert_eq!(e, KilowattHours(0.75));
    }

    #[test]
    fn arithmetic_and_sum() {
        let total: Kilowatts = [Kilowatts(1.0), Kilowatts(2.5)].into_iter().sum();
        assert_eq!(total, Kilowatts(3.5));
        assert_eq!(-(total - Kilowatts(0.5)), Kilowatts(-3.0));
        assert_eq!(Kilovars(4.0) / Kilovars(2.0), 2.0);
    }

    #[test]
    fn display_uses_unit_label() {
        assert_eq!(Kilowatts(1.0).to_string(), "1.000 kW");
        assert_eq!(PerUnit(0.95).to_string(), "0.950 pu");
    }
}
