// Validated time signatures.
//
// A time signature is carried through to the timeline for renderers; the
// generator itself only uses it for `measure_duration`. Construction checks
// that both parts are positive and the denominator is a power of two, so an
// invalid signature never exists past configuration time.

use crate::error::MusicError;
use fractal_composer_fraction::Fraction;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    numerator: u32,
    denominator: u32,
}

impl TimeSignature {
    pub const DEFAULT: TimeSignature = TimeSignature {
        numerator: 4,
        denominator: 4,
    };

    pub fn new(numerator: i64, denominator: i64) -> Result<Self, MusicError> {
        if numerator <= 0 || denominator <= 0 {
            return Err(MusicError::InvalidTimeSignature(format!(
                "{numerator}/{denominator}: both parts must be positive"
            )));
        }
        let (Ok(numerator), Ok(denominator)) = (u32::try_from(numerator), u32::try_from(denominator))
        else {
            return Err(MusicError::InvalidTimeSignature(format!(
                "{numerator}/{denominator}: too large"
            )));
        };
        if !denominator.is_power_of_two() {
            return Err(MusicError::InvalidTimeSignature(format!(
                "{numerator}/{denominator}: denominator must be a power of two"
            )));
        }
        Ok(TimeSignature {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// `log2(denominator)`, the form MIDI time signature events use.
    pub fn denominator_power_of_two(&self) -> u32 {
        self.denominator.trailing_zeros()
    }

    /// Length of one measure in whole notes.
    pub fn measure_duration(&self) -> Result<Fraction, MusicError> {
        Ok(Fraction::new(
            i64::from(self.numerator),
            i64::from(self.denominator),
        )?)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        TimeSignature::DEFAULT
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for TimeSignature {
    type Err = MusicError;

    /// Parses `"n/d"`; whitespace around either number is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MusicError::InvalidTimeSignature(format!("'{s}' is not of the form n/d"));
        let (numerator, denominator) = s.split_once('/').ok_or_else(invalid)?;
        let numerator: i64 = numerator.trim().parse().map_err(|_| invalid())?;
        let denominator: i64 = denominator.trim().parse().map_err(|_| invalid())?;
        TimeSignature::new(numerator, denominator)
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = MusicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(value: TimeSignature) -> Self {
        value.to_string()
    }
}
