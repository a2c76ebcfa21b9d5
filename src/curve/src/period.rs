// Copyright 2025 Strata Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-width binning of the time axis.
//!
//! Temporal curves keep their precision high by spending it on seconds within
//! a period rather than on all of history; the period bin is carried as a
//! separate big-endian `u16` ahead of the z-value in row keys.

use crate::{CurveError, CurveResult};

/// Length of one time bin. Month and year are fixed-length approximations
/// (30 and 365 days) for wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    Day,
    Week,
    Month,
    Year,
}

impl TimePeriod {
    pub fn seconds(&self) -> u32 {
        match self {
            TimePeriod::Day => 86_400,
            TimePeriod::Week => 604_800,
            TimePeriod::Month => 30 * 86_400,
            TimePeriod::Year => 365 * 86_400,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimePeriod::Day => "day",
            TimePeriod::Week => "week",
            TimePeriod::Month => "month",
            TimePeriod::Year => "year",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "day" => Some(TimePeriod::Day),
            "week" => Some(TimePeriod::Week),
            "month" => Some(TimePeriod::Month),
            "year" => Some(TimePeriod::Year),
            _ => None,
        }
    }

    /// Bin and seconds-into-bin for an epoch-millisecond timestamp.
    pub fn bin(&self, millis: i64) -> CurveResult<BinnedTime> {
        let secs = millis.div_euclid(1000);
        if secs < 0 {
            return Err(CurveError::TimeOverflow { millis });
        }
        let period = self.seconds() as i64;
        let bin = secs / period;
        if bin > u16::MAX as i64 {
            return Err(CurveError::TimeOverflow { millis });
        }
        Ok(BinnedTime {
            bin: bin as u16,
            offset: (secs % period) as u32,
        })
    }

    /// Bin both ends of a time range.
    pub fn bin_range(&self, lo_millis: i64, hi_millis: i64) -> CurveResult<BinnedRange> {
        let lo = self.bin(lo_millis.max(0))?;
        let hi = self.bin(hi_millis)?;
        Ok(BinnedRange {
            lo,
            hi,
            period: *self,
        })
    }
}

/// A timestamp quantized to `(bin, seconds into the bin)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinnedTime {
    pub bin: u16,
    pub offset: u32,
}

/// A time range expressed as per-bin second sub-intervals.
#[derive(Debug, Clone, Copy)]
pub struct BinnedRange {
    pub lo: BinnedTime,
    pub hi: BinnedTime,
    period: TimePeriod,
}

impl BinnedRange {
    /// Iterate `(bin, offset_lo, offset_hi)`, inclusive on both offsets:
    /// `[offset_lo, end)` semantics are applied by callers on the upper
    /// endpoint of the final bin.
    pub fn sub_intervals(&self) -> impl Iterator<Item = (u16, u32, u32)> + '_ {
        let max_offset = self.period.seconds() - 1;
        (self.lo.bin..=self.hi.bin).map(move |bin| {
            let lo = if bin == self.lo.bin { self.lo.offset } else { 0 };
            let hi = if bin == self.hi.bin {
                self.hi.offset
            } else {
                max_offset
            };
            (bin, lo, hi)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_day() {
        let t = TimePeriod::Day.bin(0).unwrap();
        assert_eq!(t, BinnedTime { bin: 0, offset: 0 });

        // 1970-01-02T06:00:00Z
        let t = TimePeriod::Day.bin((86_400 + 6 * 3600) * 1000).unwrap();
        assert_eq!(
            t,
            BinnedTime {
                bin: 1,
                offset: 6 * 3600
            }
        );
    }

    #[test]
    fn test_bin_week_known_date() {
        // 2010-05-07T00:00:00Z = 1273190400s; epoch was a Thursday
        let millis = 1_273_190_400_000;
        let t = TimePeriod::Week.bin(millis).unwrap();
        assert_eq!(t.bin, (1_273_190_400 / 604_800) as u16);
        assert_eq!(t.offset, 1_273_190_400 % 604_800);
    }

    #[test]
    fn test_bin_rejects_pre_epoch_and_far_future() {
        assert!(TimePeriod::Day.bin(-1000).is_err());
        // day bins overflow u16 after ~179 years
        assert!(TimePeriod::Day.bin(86_400_000 * 70_000).is_err());
        // the same instant is fine with a coarser period
        assert!(TimePeriod::Year.bin(86_400_000 * 70_000).is_ok());
    }

    #[test]
    fn test_sub_intervals_span() {
        let period = TimePeriod::Day;
        let range = period
            .bin_range(86_400_000 / 2, 86_400_000 * 2 + 3_600_000)
            .unwrap();
        let intervals: Vec<_> = range.sub_intervals().collect();
        assert_eq!(
            intervals,
            vec![
                (0, 43_200, 86_399),
                (1, 0, 86_399),
                (2, 0, 3_600),
            ]
        );
    }
}
