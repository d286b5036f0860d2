//! Grouped numeric recovery-password codec.
//!
//! A recovery password is the human-transcribed form of a volume recovery
//! key: eight groups of six decimal digits joined by `-`, 53 characters in
//! total. Each group's value must land in a closed range and be an exact
//! multiple of a fixed constant. Validation is the exact inverse of the
//! generation invariant — a policy check, not a checksum. It does not catch
//! every transcription error (a digit transposition can land on another
//! valid group), and deliberately stays that way.

use rand::Rng;

pub const GROUP_COUNT: usize = 8;
pub const GROUP_WIDTH: usize = 6;
pub const GROUP_SEPARATOR: char = '-';
pub const GROUP_VALUE_MIN: u64 = 1;
pub const GROUP_VALUE_MAX: u64 = 720_895;
pub const GROUP_VALUE_MULTIPLE: u64 = 11;

/// Format policy for a grouped numeric password.
///
/// The default is the volume-encryption recovery-password format; tests
/// exercise other parameter sets through the same code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub group_count: usize,
    pub group_width: usize,
    pub separator: char,
    pub min: u64,
    pub max: u64,
    pub multiple: u64,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        PasswordPolicy {
            group_count: GROUP_COUNT,
            group_width: GROUP_WIDTH,
            separator: GROUP_SEPARATOR,
            min: GROUP_VALUE_MIN,
            max: GROUP_VALUE_MAX,
            multiple: GROUP_VALUE_MULTIPLE,
        }
    }
}

impl PasswordPolicy {
    /// A policy can only produce valid groups when at least one multiple
    /// fits strictly inside the value range.
    fn well_formed(&self) -> bool {
        self.multiple != 0 && self.max >= self.min && self.max - self.min >= self.multiple
    }

    /// Generate a password with the supplied generator. Returns an empty
    /// string when the policy itself is malformed — a misconfiguration
    /// signal, not a random-number failure.
    pub fn generate_with<R: Rng>(&self, rng: &mut R) -> String {
        if !self.well_formed() {
            return String::new();
        }

        let base_min = self.min.div_ceil(self.multiple);
        let base_max = self.max / self.multiple;

        let groups: Vec<String> = (0..self.group_count)
            .map(|_| {
                let value = rng.gen_range(base_min..=base_max) * self.multiple;
                format!("{value:0width$}", width = self.group_width)
            })
            .collect();
        groups.join(&self.separator.to_string())
    }

    pub fn generate(&self) -> String {
        self.generate_with(&mut rand::thread_rng())
    }

    /// True when `password` satisfies every generation invariant: group
    /// count, digits only, value range, exact multiple.
    pub fn validate(&self, password: &str) -> bool {
        if !self.well_formed() {
            return false;
        }

        let groups = split_groups(password, self.separator);
        if groups.len() != self.group_count {
            return false;
        }

        for group in groups {
            if group.is_empty() || !group.bytes().all(|b| b.is_ascii_digit()) {
                return false;
            }
            // Parse failure here means the digit run overflows; no group
            // that long can hold an in-range value.
            let Ok(value) = group.parse::<u64>() else {
                return false;
            };
            if value % self.multiple != 0 || value < self.min || value > self.max {
                return false;
            }
        }
        true
    }
}

/// Split on the separator with the scan the format has always used: every
/// fragment *between* separators is kept (so an interior empty group is seen
/// and rejected by the digit check), while an empty fragment after the final
/// separator is not appended at all.
fn split_groups(s: &str, separator: char) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut offset = 0;
    while let Some(pos) = s[offset..].find(separator) {
        groups.push(&s[offset..offset + pos]);
        offset += pos + separator.len_utf8();
    }
    if offset < s.len() {
        groups.push(&s[offset..]);
    }
    groups
}

/// Generate a recovery password under the default policy.
pub fn generate() -> String {
    PasswordPolicy::default().generate()
}

/// Validate a recovery password under the default policy.
pub fn validate(password: &str) -> bool {
    PasswordPolicy::default().validate(password)
}
