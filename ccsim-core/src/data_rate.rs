use crate::time::SimTime;
use logos::{Lexer, Logos};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// The [`DataRate`] of a link, in bits per second.
///
/// Units are decimal (SI): `1kbps` is 1_000 bits per second, `1Mbps` is
/// 1_000_000 bits per second. Unit names are case-insensitive.
///
/// # Example
///
/// ```
/// # use ccsim_core::{DataRate, SimTime};
/// let rate: DataRate = "10Mbps".parse().unwrap();
/// assert_eq!(rate.bits_per_sec(), 10_000_000);
///
/// // 1_250 bytes at 10Mbps take one millisecond to serialise
/// assert_eq!(rate.transmission_time(1_250), SimTime::from_millis(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate(u64);

const K: u64 = 1_000;
const M: u64 = 1_000 * K;
const G: u64 = 1_000 * M;

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        Self(kbps * K)
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self(mbps * M)
    }

    #[inline]
    pub const fn bits_per_sec(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Time needed to put `bytes` on the wire at this rate, rounded up to
    /// the next microsecond.
    ///
    /// A zero rate never finishes and returns [`SimTime::MAX`].
    pub fn transmission_time(self, bytes: u64) -> SimTime {
        if self.0 == 0 {
            return SimTime::MAX;
        }
        let bits = bytes as u128 * 8 * 1_000_000;
        let us = bits.div_ceil(self.0 as u128);
        SimTime::from_micros(us.min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if v >= G && v % G == 0 {
            write!(f, "{}Gbps", v / G)
        } else if v >= M && v % M == 0 {
            write!(f, "{}Mbps", v / M)
        } else if v >= K && v % K == 0 {
            write!(f, "{}kbps", v / K)
        } else {
            write!(f, "{v}bps")
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataRateParseError {
    #[error("Expecting to parse a number in `{0}'")]
    ExpectedNumber(String),
    #[error("Expecting to parse a unit (bps, kbps, Mbps, Gbps) in `{0}'")]
    ExpectedUnit(String),
    #[error("Not expecting any other tokens to parse a data rate: `{0}'")]
    TrailingTokens(String),
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")] // Ignore this regex pattern between tokens
enum DataRateToken {
    #[token("bps", ignore(ascii_case))]
    #[token("b/s", ignore(ascii_case))]
    Bps,
    #[token("kbps", ignore(ascii_case))]
    #[token("kb/s", ignore(ascii_case))]
    Kbps,
    #[token("mbps", ignore(ascii_case))]
    #[token("mb/s", ignore(ascii_case))]
    Mbps,
    #[token("gbps", ignore(ascii_case))]
    #[token("gb/s", ignore(ascii_case))]
    Gbps,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Value,
}

impl FromStr for DataRate {
    type Err = DataRateParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, DataRateToken>::new(s);

        let Some(Ok(DataRateToken::Value)) = lex.next() else {
            return Err(DataRateParseError::ExpectedNumber(s.to_owned()));
        };
        let number: f64 = lex
            .slice()
            .parse()
            .map_err(|_| DataRateParseError::ExpectedNumber(s.to_owned()))?;
        let Some(Ok(token)) = lex.next() else {
            return Err(DataRateParseError::ExpectedUnit(s.to_owned()));
        };
        let multiplier = match token {
            DataRateToken::Bps => 1,
            DataRateToken::Kbps => K,
            DataRateToken::Mbps => M,
            DataRateToken::Gbps => G,
            DataRateToken::Value => return Err(DataRateParseError::ExpectedUnit(s.to_owned())),
        };

        if lex.next().is_some() {
            return Err(DataRateParseError::TrailingTokens(s.to_owned()));
        }

        Ok(Self((number * multiplier as f64).round() as u64))
    }
}
