// Exact rational arithmetic for durations and time points.
//
// Every duration in Fractal Composer is a `Fraction` of a whole note: a
// quarter note is 1/4, a triplet eighth is 1/12. Self-similarity nests copies
// of the germ inside one another and multiplies durations by ratios like
// 1/3 or 1/6 at every level, so floating point would drift after a few
// iterations. Fractions stay exact no matter how deep the nesting goes.
//
// The value lives in a `num_rational::Ratio<i64>`, which keeps it reduced with
// a positive denominator. Arithmetic widens to `Ratio<i128>`, reduces, and
// then narrows back: a result only fails if its *reduced* form does not fit
// in 64 bits. All operations return `Result` instead of panicking, because a
// composition that is too complex to represent exactly is a reportable
// condition rather than a bug.
//
// Also provides `checked_lcm`, used by the timeline to find the smallest tick
// resolution that represents every fractional time point exactly.
//
// This crate has no music knowledge; `fractal_composer_music` builds on it.

use num_integer::Integer;
use num_rational::Ratio;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Failure modes of fraction arithmetic and parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FractionError {
    #[error("fraction has a zero denominator")]
    ZeroDenominator,
    #[error("fraction arithmetic overflowed 64 bits")]
    Overflow,
    #[error("invalid fraction '{0}'")]
    Parse(String),
}

/// An exact rational number, always stored in lowest terms with a positive
/// denominator. Equality, ordering and hashing are by value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fraction(Ratio<i64>);

impl Fraction {
    pub const ZERO: Fraction = Fraction(Ratio::new_raw(0, 1));
    pub const ONE: Fraction = Fraction(Ratio::new_raw(1, 1));
    pub const QUARTER: Fraction = Fraction(Ratio::new_raw(1, 4));

    /// Create a fraction, reducing it to lowest terms.
    pub fn new(numer: i64, denom: i64) -> Result<Self, FractionError> {
        if denom == 0 {
            return Err(FractionError::ZeroDenominator);
        }
        narrow(Ratio::new(i128::from(numer), i128::from(denom)))
    }

    pub fn from_integer(n: i64) -> Self {
        Fraction(Ratio::from_integer(n))
    }

    pub fn numer(self) -> i64 {
        *self.0.numer()
    }

    /// Always positive.
    pub fn denom(self) -> i64 {
        *self.0.denom()
    }

    pub fn is_zero(self) -> bool {
        self.numer() == 0
    }

    pub fn is_positive(self) -> bool {
        self.numer() > 0
    }

    pub fn is_negative(self) -> bool {
        self.numer() < 0
    }

    pub fn is_integer(self) -> bool {
        self.denom() == 1
    }

    pub fn plus(self, rhs: Fraction) -> Result<Fraction, FractionError> {
        narrow(self.widen() + rhs.widen())
    }

    pub fn minus(self, rhs: Fraction) -> Result<Fraction, FractionError> {
        narrow(self.widen() - rhs.widen())
    }

    pub fn times(self, rhs: Fraction) -> Result<Fraction, FractionError> {
        narrow(self.widen() * rhs.widen())
    }

    pub fn divided_by(self, rhs: Fraction) -> Result<Fraction, FractionError> {
        if rhs.is_zero() {
            return Err(FractionError::ZeroDenominator);
        }
        narrow(self.widen() / rhs.widen())
    }

    /// `1 / self`.
    pub fn recip(self) -> Result<Fraction, FractionError> {
        Fraction::ONE.divided_by(self)
    }

    /// Lossy conversion for consumers that cannot work with exact values.
    pub fn to_f64(self) -> f64 {
        self.numer() as f64 / self.denom() as f64
    }

    /// Checked sum of a sequence of fractions.
    pub fn sum<I: IntoIterator<Item = Fraction>>(values: I) -> Result<Fraction, FractionError> {
        values
            .into_iter()
            .try_fold(Fraction::ZERO, |acc, value| acc.plus(value))
    }

    fn widen(self) -> Ratio<i128> {
        Ratio::new_raw(i128::from(self.numer()), i128::from(self.denom()))
    }
}

/// Narrow an already-reduced wide ratio back into 64 bits.
fn narrow(wide: Ratio<i128>) -> Result<Fraction, FractionError> {
    let numer = i64::try_from(*wide.numer()).map_err(|_| FractionError::Overflow)?;
    let denom = i64::try_from(*wide.denom()).map_err(|_| FractionError::Overflow)?;
    Ok(Fraction(Ratio::new_raw(numer, denom)))
}

/// Least common multiple of two integers, or `None` if it overflows `i64`.
/// The result is non-negative; `lcm(0, x)` is 0.
pub fn checked_lcm(a: i64, b: i64) -> Option<i64> {
    if a == 0 || b == 0 {
        return Some(0);
    }
    let g = a.gcd(&b);
    (a / g).checked_mul(b)?.checked_abs()
}

impl Default for Fraction {
    fn default() -> Self {
        Fraction::ZERO
    }
}

impl From<i64> for Fraction {
    fn from(n: i64) -> Self {
        Fraction::from_integer(n)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integer() {
            write!(f, "{}", self.numer())
        } else {
            write!(f, "{}/{}", self.numer(), self.denom())
        }
    }
}

impl fmt::Debug for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numer(), self.denom())
    }
}

impl FromStr for Fraction {
    type Err = FractionError;

    /// Parses `"n/d"` or `"n"`, allowing whitespace around the slash.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_part = |part: &str| {
            part.trim()
                .parse::<i64>()
                .map_err(|_| FractionError::Parse(s.to_string()))
        };
        match s.split_once('/') {
            Some((numer, denom)) => Fraction::new(parse_part(numer)?, parse_part(denom)?),
            None => Ok(Fraction::from_integer(parse_part(s)?)),
        }
    }
}

impl TryFrom<String> for Fraction {
    type Error = FractionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fraction> for String {
    fn from(value: Fraction) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d).unwrap()
    }

    #[test]
    fn test_stored_in_lowest_terms() {
        let f = frac(6, -8);
        assert_eq!(f.numer(), -3);
        assert_eq!(f.denom(), 4);
        assert_eq!(frac(0, -5), Fraction::ZERO);
        assert_eq!(frac(0, -5).denom(), 1);
    }

    #[test]
    fn test_constants_are_reduced() {
        assert_eq!(Fraction::ZERO, frac(0, 7));
        assert_eq!(Fraction::ONE, frac(3, 3));
        assert_eq!(Fraction::QUARTER, frac(2, 8));
        assert_eq!(Fraction::QUARTER.to_string(), "1/4");
    }

    #[test]
    fn test_equality_by_value() {
        assert_eq!(frac(2, 4), frac(1, 2));
        assert_eq!(frac(-1, -3), frac(1, 3));

        use std::collections::HashSet;
        let set: HashSet<Fraction> = [frac(1, 2), frac(2, 4), frac(3, 6)].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_zero_denominator_rejected() {
        assert_eq!(Fraction::new(1, 0), Err(FractionError::ZeroDenominator));
        assert_eq!(
            frac(1, 2).divided_by(Fraction::ZERO),
            Err(FractionError::ZeroDenominator)
        );
        assert_eq!(Fraction::ZERO.recip(), Err(FractionError::ZeroDenominator));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(frac(1, 4).plus(frac(1, 8)).unwrap(), frac(3, 8));
        assert_eq!(frac(1, 4).minus(frac(1, 3)).unwrap(), frac(-1, 12));
        assert_eq!(frac(1, 3).times(frac(3, 1)).unwrap(), Fraction::ONE);
        assert_eq!(frac(3, 4).divided_by(frac(3, 8)).unwrap(), frac(2, 1));
        assert_eq!(frac(-2, 7).recip().unwrap(), frac(-7, 2));
    }

    #[test]
    fn test_add_then_subtract_is_identity() {
        let values = [
            frac(1, 3),
            frac(-5, 7),
            frac(22, 9),
            frac(1, 1024),
            frac(i64::MAX / 3, 2),
            Fraction::ZERO,
        ];
        for &a in &values {
            for &b in &values {
                if let Ok(sum) = a.plus(b) {
                    assert_eq!(sum.minus(b).unwrap(), a, "({a} + {b}) - {b}");
                }
            }
        }
    }

    #[test]
    fn test_reduced_result_that_fits_does_not_overflow() {
        // The unreduced product needs more than 64 bits; the reduced one doesn't.
        let big = frac(i64::MAX, 3);
        assert_eq!(big.times(frac(3, i64::MAX)).unwrap(), Fraction::ONE);
    }

    #[test]
    fn test_overflow_reported() {
        let big = Fraction::from_integer(i64::MAX);
        assert_eq!(big.plus(Fraction::ONE), Err(FractionError::Overflow));
        assert_eq!(big.times(frac(2, 1)), Err(FractionError::Overflow));
        assert_eq!(
            frac(1, i64::MAX).times(frac(1, 2)),
            Err(FractionError::Overflow)
        );
        assert_eq!(Fraction::new(i64::MIN, -1), Err(FractionError::Overflow));
    }

    #[test]
    fn test_ordering() {
        let mut values = vec![frac(1, 2), frac(-1, 3), frac(1, 3), frac(5, 4)];
        values.sort();
        assert_eq!(values, vec![frac(-1, 3), frac(1, 3), frac(1, 2), frac(5, 4)]);
        assert!(frac(1, 3) < frac(34, 100));
    }

    #[test]
    fn test_sum() {
        let total = Fraction::sum([frac(1, 4), frac(1, 8), frac(1, 8), frac(1, 4)]).unwrap();
        assert_eq!(total, frac(3, 4));
        assert_eq!(Fraction::sum(std::iter::empty()).unwrap(), Fraction::ZERO);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("3/8".parse::<Fraction>().unwrap(), frac(3, 8));
        assert_eq!(" 6 / 16 ".parse::<Fraction>().unwrap(), frac(3, 8));
        assert_eq!("-2".parse::<Fraction>().unwrap(), frac(-2, 1));
        assert!("3/".parse::<Fraction>().is_err());
        assert!("x/4".parse::<Fraction>().is_err());
        assert_eq!("1/0".parse::<Fraction>(), Err(FractionError::ZeroDenominator));

        assert_eq!(frac(3, 8).to_string(), "3/8");
        assert_eq!(frac(4, 2).to_string(), "2");
        assert_eq!(format!("{:?}", frac(4, 2)), "2/1");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&frac(1, 12)).unwrap();
        assert_eq!(json, "\"1/12\"");
        let back: Fraction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frac(1, 12));
        assert!(serde_json::from_str::<Fraction>("\"1/0\"").is_err());
    }

    #[test]
    fn test_to_f64() {
        assert_eq!(frac(3, 8).to_f64(), 0.375);
    }

    #[test]
    fn test_checked_lcm() {
        assert_eq!(checked_lcm(4, 6), Some(12));
        assert_eq!(checked_lcm(1, 7), Some(7));
        assert_eq!(checked_lcm(0, 7), Some(0));
        assert_eq!(checked_lcm(-4, 6), Some(12));
        assert_eq!(checked_lcm(i64::MAX, i64::MAX - 1), None);
    }
}
