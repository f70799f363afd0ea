use logos::{Lexer, Logos};
use std::{fmt, ops, str::FromStr, time::Duration};
use thiserror::Error;

/// A point on (or a span of) the virtual clock.
///
/// Time is kept as whole microseconds since the start of the simulation.
/// Integer time keeps periodic activities exactly spaced: ten steps of
/// `0.1s` land exactly on `1s`, which floating point accumulation does not
/// guarantee.
///
/// # Display
///
/// [`SimTime`] displays as a number of seconds, the format used in the
/// trace files.
///
/// ```
/// # use ccsim_core::SimTime;
/// assert_eq!(SimTime::from_millis(100).to_string(), "0.1");
/// assert_eq!(SimTime::from_millis(20_100).to_string(), "20.1");
/// assert_eq!(SimTime::ZERO.to_string(), "0");
/// ```
///
/// # Parsing
///
/// Durations are parsed from strings with units, possibly with a
/// fractional part:
///
/// ```
/// # use ccsim_core::SimTime;
/// let delay: SimTime = "45ms".parse().unwrap();
/// assert_eq!(delay, SimTime::from_millis(45));
///
/// let delay: SimTime = "0.01ms".parse().unwrap();
/// assert_eq!(delay, SimTime::from_micros(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

const MICROS_PER_SEC: u64 = 1_000_000;

impl SimTime {
    /// The start of the simulation.
    pub const ZERO: Self = Self(0);

    /// The largest representable time.
    pub const MAX: Self = Self(u64::MAX);

    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us)
    }

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms * 1_000)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * MICROS_PER_SEC)
    }

    /// Convert a number of seconds, rounding to the closest microsecond.
    ///
    /// # Errors
    ///
    /// Fails on NaN, infinite or negative input.
    ///
    /// ```
    /// # use ccsim_core::SimTime;
    /// assert_eq!(SimTime::try_from_secs_f64(10.1).unwrap(), SimTime::from_micros(10_100_000));
    /// assert!(SimTime::try_from_secs_f64(-1.0).is_err());
    /// ```
    pub fn try_from_secs_f64(secs: f64) -> Result<Self, TimeParseError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(TimeParseError::OutOfRange(secs));
        }
        let us = (secs * MICROS_PER_SEC as f64).round();
        if us > u64::MAX as f64 {
            return Err(TimeParseError::OutOfRange(secs));
        }
        Ok(Self(us as u64))
    }

    #[inline]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_SEC as f64
    }

    #[inline]
    pub fn into_duration(self) -> Duration {
        Duration::from_micros(self.0)
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn checked_mul(self, rhs: u64) -> Option<Self> {
        self.0.checked_mul(rhs).map(Self)
    }
}

impl From<Duration> for SimTime {
    fn from(value: Duration) -> Self {
        Self(value.as_micros().min(u64::MAX as u128) as u64)
    }
}

impl From<SimTime> for Duration {
    fn from(value: SimTime) -> Self {
        value.into_duration()
    }
}

impl ops::Add for SimTime {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl ops::AddAssign for SimTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl ops::Sub for SimTime {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl ops::Mul<u64> for SimTime {
    type Output = Self;
    fn mul(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_mul(rhs))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_secs_f64())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeParseError {
    #[error("Failed to parse `{0}'")]
    Lexer(String),
    #[error("Expecting duration to start with a number, cannot parse `{0}'")]
    ExpectedNumber(String),
    #[error("Expecting a unit (ns, us, ms, s, m) after the number in `{0}'")]
    ExpectedUnit(String),
    #[error("Invalid number in `{0}'")]
    InvalidNumber(String),
    #[error("Time must be a finite, non negative number of seconds, got {0}")]
    OutOfRange(f64),
}

impl FromStr for SimTime {
    type Err = TimeParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, Token>::new(s);
        let mut total = 0f64;
        let mut parsed_any = false;

        while let Some(next) = lex.next() {
            let number = next.map_err(|()| TimeParseError::Lexer(s.to_owned()))?;
            if number != Token::Value {
                return Err(TimeParseError::ExpectedNumber(s.to_owned()));
            }
            let number: f64 = lex
                .slice()
                .parse()
                .map_err(|_| TimeParseError::InvalidNumber(s.to_owned()))?;

            let Some(Ok(unit)) = lex.next() else {
                return Err(TimeParseError::ExpectedUnit(s.to_owned()));
            };
            let micros = match unit {
                Token::NanoSeconds => number / 1_000.0,
                Token::MicroSeconds => number,
                Token::MilliSeconds => number * 1_000.0,
                Token::Seconds => number * MICROS_PER_SEC as f64,
                Token::Minutes => number * 60.0 * MICROS_PER_SEC as f64,
                Token::Value => return Err(TimeParseError::ExpectedUnit(s.to_owned())),
            };
            total += micros;
            parsed_any = true;
        }

        if !parsed_any {
            return Err(TimeParseError::ExpectedNumber(s.to_owned()));
        }

        Self::try_from_secs_f64(total / MICROS_PER_SEC as f64)
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")] // Ignore this regex pattern between tokens
enum Token {
    #[token("ns")]
    NanoSeconds,
    #[regex("us|μs")]
    MicroSeconds,
    #[token("ms")]
    MilliSeconds,
    #[token("s")]
    Seconds,
    #[regex("m|min")]
    Minutes,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logos_lexer() {
        let mut lex = Token::lexer("0.01ms");

        assert_eq!(lex.next(), Some(Ok(Token::Value)));
        assert_eq!(lex.slice(), "0.01");

        assert_eq!(lex.next(), Some(Ok(Token::MilliSeconds)));
        assert_eq!(lex.slice(), "ms");
        assert_eq!(lex.next(), None);
    }

    #[test]
    fn parse() {
        assert_eq!("123ms".parse::<SimTime>().unwrap(), SimTime::from_millis(123));
        assert_eq!(
            "1s 2000ms 3000000us".parse::<SimTime>().unwrap(),
            SimTime::from_secs(6)
        );
        assert_eq!("45ms".parse::<SimTime>().unwrap().as_micros(), 45_000);
        assert_eq!("1.5s".parse::<SimTime>().unwrap(), SimTime::from_millis(1_500));
        assert_eq!("1500ns".parse::<SimTime>().unwrap(), SimTime::from_micros(2));
    }

    #[test]
    fn parse_invalid_strings() {
        assert!(matches!(
            "150".parse::<SimTime>(),
            Err(TimeParseError::ExpectedUnit(_))
        ));
        assert!(matches!(
            "ms".parse::<SimTime>(),
            Err(TimeParseError::ExpectedNumber(_))
        ));
        assert!("".parse::<SimTime>().is_err());
        assert!("12 parsecs".parse::<SimTime>().is_err());
    }

    #[test]
    fn display_seconds() {
        assert_eq!(SimTime::from_millis(300).to_string(), "0.3");
        assert_eq!(SimTime::from_secs(10).to_string(), "10");
        assert_eq!(SimTime::from_micros(10_100_000).to_string(), "10.1");
    }

    #[test]
    fn exact_steps() {
        let step = SimTime::from_millis(100);
        assert_eq!(step * 10, SimTime::from_secs(1));
        assert_eq!(SimTime::try_from_secs_f64(0.1).unwrap(), step);
    }

    #[test]
    fn saturating_arithmetic() {
        assert_eq!(SimTime::ZERO - SimTime::from_secs(1), SimTime::ZERO);
        assert_eq!(SimTime::MAX + SimTime::from_secs(1), SimTime::MAX);
        assert!(SimTime::MAX.checked_add(SimTime::from_micros(1)).is_none());
    }

    #[test]
    fn rejects_bad_seconds() {
        assert!(SimTime::try_from_secs_f64(f64::NAN).is_err());
        assert!(SimTime::try_from_secs_f64(f64::INFINITY).is_err());
        assert!(SimTime::try_from_secs_f64(-0.1).is_err());
    }
}
