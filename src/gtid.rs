//! GTID Sets
//!
//! Replication positions are compared as GTID sets: a map from source
//! UUID (optionally `uuid:tag`) to sorted, non-overlapping, inclusive
//! transaction intervals.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Error, Result};

type Interval = (u64, u64);

/// A set of global transaction identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GtidSet {
    sets: BTreeMap<String, Vec<Interval>>,
}

impl GtidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Number of transactions in the set
    pub fn count(&self) -> u64 {
        self.sets
            .values()
            .flat_map(|ivs| ivs.iter())
            .map(|(s, e)| e - s + 1)
            .sum()
    }

    /// Add the interval `start..=end` for `source`
    pub fn add(&mut self, source: &str, start: u64, end: u64) {
        if start == 0 || end < start {
            return;
        }
        let ivs = self.sets.entry(source.to_ascii_lowercase()).or_default();
        ivs.push((start, end));
        normalize(ivs);
    }

    /// Check if every transaction of `other` is contained in this set
    pub fn contains(&self, other: &GtidSet) -> bool {
        other.subtract(self).is_empty()
    }

    /// Transactions in this set that are not in `other`
    pub fn subtract(&self, other: &GtidSet) -> GtidSet {
        let mut out = GtidSet::new();
        for (source, mine) in &self.sets {
            let remaining = match other.sets.get(source) {
                Some(theirs) => subtract_intervals(mine, theirs),
                None => mine.clone(),
            };
            if !remaining.is_empty() {
                out.sets.insert(source.clone(), remaining);
            }
        }
        out
    }

    /// Transactions present in both sets
    pub fn intersection(&self, other: &GtidSet) -> GtidSet {
        self.subtract(&self.subtract(other))
    }
}

fn normalize(ivs: &mut Vec<Interval>) {
    ivs.sort_unstable();
    let mut merged: Vec<Interval> = Vec::with_capacity(ivs.len());
    for &(s, e) in ivs.iter() {
        match merged.last_mut() {
            Some(last) if s <= last.1.saturating_add(1) => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }
    *ivs = merged;
}

fn subtract_intervals(mine: &[Interval], theirs: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    for &(start, end) in mine {
        let mut cursor = start;
        let mut exhausted = false;
        for &(os, oe) in theirs {
            if oe < cursor {
                continue;
            }
            if os > end {
                break;
            }
            if os > cursor {
                out.push((cursor, os - 1));
            }
            if oe >= end {
                exhausted = true;
                break;
            }
            cursor = oe + 1;
        }
        if !exhausted {
            out.push((cursor, end));
        }
    }
    out
}

impl FromStr for GtidSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut set = GtidSet::new();
        let invalid = || Error::Replication(format!("Invalid GTID set '{}'", s));

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let mut fields = part.split(':');
            let uuid = fields.next().map(str::trim).filter(|u| !u.is_empty()).ok_or_else(invalid)?;
            let mut source = uuid.to_string();

            for field in fields {
                let field = field.trim();
                let first = field.chars().next().ok_or_else(invalid)?;
                if !first.is_ascii_digit() {
                    // Tagged GTIDs: subsequent intervals belong to `uuid:tag`
                    source = format!("{}:{}", uuid, field);
                    continue;
                }
                let (start, end) = match field.split_once('-') {
                    Some((a, b)) => (
                        a.parse::<u64>().map_err(|_| invalid())?,
                        b.parse::<u64>().map_err(|_| invalid())?,
                    ),
                    None => {
                        let n = field.parse::<u64>().map_err(|_| invalid())?;
                        (n, n)
                    }
                };
                if start == 0 || end < start {
                    return Err(invalid());
                }
                set.add(&source, start, end);
            }
        }

        Ok(set)
    }
}

impl std::fmt::Display for GtidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (source, ivs) in &self.sets {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            f.write_str(source)?;
            for (s, e) in ivs {
                if s == e {
                    write!(f, ":{}", s)?;
                } else {
                    write!(f, ":{}-{}", s, e)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
    const B: &str = "2174b383-5441-11e8-b90a-c80aa9429562";

    fn gtid(s: &str) -> GtidSet {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let set = gtid(&format!("{}:1-5:7:6, {}:1-3", A.to_uppercase(), B));
        assert_eq!(set.to_string(), format!("{}:1-3,{}:1-7", B, A));
        assert_eq!(set.count(), 10);
        assert!(gtid("").is_empty());
        assert!(format!("{}:0-3", A).parse::<GtidSet>().is_err());
        assert!(format!("{}:x", A).parse::<GtidSet>().is_ok());
        assert!(format!("{}:5-2", A).parse::<GtidSet>().is_err());
    }

    #[test]
    fn test_subtract_and_contains() {
        let donor = gtid(&format!("{}:1-100", A));
        let target = gtid(&format!("{}:1-40:50-60", A));

        assert!(donor.contains(&target));
        assert!(!target.contains(&donor));

        let missing = donor.subtract(&target);
        assert_eq!(missing.to_string(), format!("{}:41-49:61-100", A));

        let errant = gtid(&format!("{}:1-10,{}:1", A, B)).subtract(&donor);
        assert_eq!(errant.to_string(), format!("{}:1", B));
    }

    #[test]
    fn test_intersection() {
        let purged = gtid(&format!("{}:1-20", A));
        let missing = gtid(&format!("{}:15-30", A));
        assert_eq!(missing.intersection(&purged).to_string(), format!("{}:15-20", A));
        assert!(gtid(&format!("{}:21-30", A)).intersection(&purged).is_empty());
    }

    #[test]
    fn test_tagged_gtids() {
        let set = gtid(&format!("{}:1-3:audit:1-2", A));
        assert_eq!(set.count(), 5);
        assert!(set.contains(&gtid(&format!("{}:audit:2", A))));
    }
}
