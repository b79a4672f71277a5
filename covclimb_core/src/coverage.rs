use std::collections::HashSet;
use std::collections::hash_set;
use std::fmt;

/// One instrumented program location: an offset inside a named module.
///
/// Rendered as the token `module+offset`, with the offset in lowercase hex
/// (`libfoo.so+1a2b`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    module: String,
    offset: u64,
}

impl Location {
    pub fn new(module: impl Into<String>, offset: u64) -> Self {
        Self {
            module: module.into(),
            offset,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:x}", self.module, self.offset)
    }
}

/// A set of distinct `Location`s observed during one or more executions.
///
/// The same type serves as the per-execution result of an observer and as the
/// cumulative set owned by `CoverageFeedback`. Growth only happens through
/// `insert` and `merge`; there is no removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageSet {
    locations: HashSet<Location>,
}

impl CoverageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.locations.contains(location)
    }

    /// Returns `true` if the location was not present before.
    pub fn insert(&mut self, location: Location) -> bool {
        self.locations.insert(location)
    }

    /// Unions `other` into `self` and returns how many locations were new.
    pub fn merge(&mut self, other: &CoverageSet) -> usize {
        let before = self.locations.len();
        self.locations.extend(other.locations.iter().cloned());
        self.locations.len() - before
    }

    /// Number of locations in `other` that `self` does not contain yet.
    ///
    /// Equal to what `merge` would return, without touching `self`.
    pub fn count_new(&self, other: &CoverageSet) -> usize {
        other
            .locations
            .iter()
            .filter(|loc| !self.locations.contains(loc))
            .count()
    }

    pub fn is_superset(&self, other: &CoverageSet) -> bool {
        self.locations.is_superset(&other.locations)
    }

    pub fn iter(&self) -> hash_set::Iter<'_, Location> {
        self.locations.iter()
    }

    /// The rendered tokens, sorted. Mostly useful for display and tests.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.locations.iter().map(Location::to_string).collect();
        tokens.sort();
        tokens
    }
}

impl FromIterator<Location> for CoverageSet {
    fn from_iter<T: IntoIterator<Item = Location>>(iter: T) -> Self {
        Self {
            locations: iter.into_iter().collect(),
        }
    }
}

impl Extend<Location> for CoverageSet {
    fn extend<T: IntoIterator<Item = Location>>(&mut self, iter: T) {
        self.locations.extend(iter);
    }
}

impl IntoIterator for CoverageSet {
    type Item = Location;
    type IntoIter = hash_set::IntoIter<Location>;

    fn into_iter(self) -> Self::IntoIter {
        self.locations.into_iter()
    }
}

impl<'a> IntoIterator for &'a CoverageSet {
    type Item = &'a Location;
    type IntoIter = hash_set::Iter<'a, Location>;

    fn into_iter(self) -> Self::IntoIter {
        self.locations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(module: &str, offsets: &[u64]) -> CoverageSet {
        offsets.iter().map(|&o| Location::new(module, o)).collect()
    }

    #[test]
    fn location_renders_module_plus_hex_offset() {
        assert_eq!(Location::new("mod", 0x10).to_string(), "mod+10");
        assert_eq!(Location::new("libfoo.so", 0xdeadbeef).to_string(), "libfoo.so+deadbeef");
        assert_eq!(Location::new("m", 0).to_string(), "m+0");
    }

    #[test]
    fn merge_with_self_is_idempotent() {
        let mut set = set_of("mod", &[1, 2, 3]);
        let copy = set.clone();
        assert_eq!(set.merge(&copy), 0);
        assert_eq!(set, copy);
    }

    #[test]
    fn merge_empty_into_set_and_set_into_empty() {
        let reference = set_of("mod", &[7, 8]);

        let mut set = reference.clone();
        assert_eq!(set.merge(&CoverageSet::new()), 0);
        assert_eq!(set, reference);

        let mut empty = CoverageSet::new();
        assert_eq!(empty.merge(&reference), 2);
        assert_eq!(empty, reference);
    }

    #[test]
    fn merge_reports_only_new_locations() {
        let mut global = set_of("a", &[1, 2]);
        let mut sample = set_of("a", &[2, 3]);
        sample.insert(Location::new("b", 2));

        assert_eq!(global.count_new(&sample), 2);
        assert_eq!(global.merge(&sample), 2);
        assert_eq!(global.len(), 4);
        assert!(global.is_superset(&sample));
    }

    #[test]
    fn same_offset_in_different_modules_is_distinct() {
        let mut set = CoverageSet::new();
        assert!(set.insert(Location::new("a", 0x40)));
        assert!(set.insert(Location::new("b", 0x40)));
        assert!(!set.insert(Location::new("a", 0x40)));
        assert_eq!(set.tokens(), vec!["a+40".to_string(), "b+40".to_string()]);
    }
}
