//! Build artifacts grouped by platform family.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two platform-specific binary groupings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFamily {
    /// Family A.
    Windows,
    /// Family B.
    Unix,
}

impl ArtifactFamily {
    pub const ALL: [ArtifactFamily; 2] = [ArtifactFamily::Windows, ArtifactFamily::Unix];

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactFamily::Windows => "windows",
            ArtifactFamily::Unix => "unix",
        }
    }
}

impl fmt::Display for ArtifactFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Two disjoint named groups of artifact identifiers.
///
/// Each group is a set, so merging is an idempotent per-family union and
/// iteration order never depends on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    #[serde(rename = "WinBinaries", default)]
    windows: BTreeSet<String>,
    #[serde(rename = "UnixBinaries", default)]
    unix: BTreeSet<String>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lists<W, U>(windows: W, unix: U) -> Self
    where
        W: IntoIterator,
        W::Item: Into<String>,
        U: IntoIterator,
        U::Item: Into<String>,
    {
        Self {
            windows: windows.into_iter().map(Into::into).collect(),
            unix: unix.into_iter().map(Into::into).collect(),
        }
    }

    pub fn family(&self, family: ArtifactFamily) -> &BTreeSet<String> {
        match family {
            ArtifactFamily::Windows => &self.windows,
            ArtifactFamily::Unix => &self.unix,
        }
    }

    pub fn windows(&self) -> &BTreeSet<String> {
        &self.windows
    }

    pub fn unix(&self) -> &BTreeSet<String> {
        &self.unix
    }

    /// Insert `name` into `family`. Returns `false` if it was already present.
    pub fn insert(&mut self, family: ArtifactFamily, name: impl Into<String>) -> bool {
        match family {
            ArtifactFamily::Windows => self.windows.insert(name.into()),
            ArtifactFamily::Unix => self.unix.insert(name.into()),
        }
    }

    pub fn contains(&self, family: ArtifactFamily, name: &str) -> bool {
        self.family(family).contains(name)
    }

    /// Per-family union with `other`.
    pub fn merge(&mut self, other: &ArtifactSet) {
        self.windows.extend(other.windows.iter().cloned());
        self.unix.extend(other.unix.iter().cloned());
    }

    /// Names present in `other` but absent here, per family.
    pub fn missing_from(&self, other: &ArtifactSet, family: ArtifactFamily) -> Vec<String> {
        other
            .family(family)
            .difference(self.family(family))
            .cloned()
            .collect()
    }

    /// Every artifact of both families, duplicates removed.
    pub fn union_names(&self) -> BTreeSet<String> {
        self.windows.union(&self.unix).cloned().collect()
    }

    pub fn len(&self, family: ArtifactFamily) -> usize {
        self.family(family).len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty() && self.unix.is_empty()
    }
}

/// Families a merge-request label contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelClass {
    WindowsOnly,
    UnixOnly,
    Both,
    /// The "both" default with the unix side suppressed.
    BothExceptUnix,
}

impl LabelClass {
    pub fn families(&self) -> &'static [ArtifactFamily] {
        match self {
            LabelClass::WindowsOnly | LabelClass::BothExceptUnix => &[ArtifactFamily::Windows],
            LabelClass::UnixOnly => &[ArtifactFamily::Unix],
            LabelClass::Both => &ArtifactFamily::ALL,
        }
    }
}

/// Exact label name treated like a unix shell script.
pub const UNIX_SCRIPT_SENTINEL: &str = "cvToolsBase.sh.tmpl";

/// Labels that stay out of the unix family even under the "both" default.
pub const UNIX_EXCLUDED_LABELS: [&str; 2] = ["cv-ac-master", "cv-wc-master"];

/// A free-text tag attached to a change request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Suffix-based classification of this label.
    pub fn classify(&self) -> LabelClass {
        classify_name(&self.0).unwrap_or_else(|| {
            if UNIX_EXCLUDED_LABELS.contains(&self.0.as_str()) {
                LabelClass::BothExceptUnix
            } else {
                LabelClass::Both
            }
        })
    }
}

/// Family-specific classification for an artifact-like name, or `None` when
/// the suffix carries no platform information.
pub fn classify_name(name: &str) -> Option<LabelClass> {
    if name.ends_with(".tar") {
        Some(LabelClass::UnixOnly)
    } else if name.ends_with(".see") || name.ends_with(".cmd") {
        Some(LabelClass::WindowsOnly)
    } else if name.ends_with(".sh") || name == UNIX_SCRIPT_SENTINEL {
        Some(LabelClass::UnixOnly)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_suffix_rules() {
        assert_eq!(Label::new("x.tar").classify(), LabelClass::UnixOnly);
        assert_eq!(Label::new("x.see").classify(), LabelClass::WindowsOnly);
        assert_eq!(Label::new("x.cmd").classify(), LabelClass::WindowsOnly);
        assert_eq!(Label::new("x.sh").classify(), LabelClass::UnixOnly);
        assert_eq!(
            Label::new(UNIX_SCRIPT_SENTINEL).classify(),
            LabelClass::UnixOnly
        );
        assert_eq!(Label::new("cv-ac-core.jar").classify(), LabelClass::Both);
    }

    #[test]
    fn test_sentinel_labels_skip_unix() {
        for name in UNIX_EXCLUDED_LABELS {
            let class = Label::new(name).classify();
            assert_eq!(class, LabelClass::BothExceptUnix);
            assert_eq!(class.families(), &[ArtifactFamily::Windows]);
        }
    }

    #[test]
    fn test_merge_is_idempotent_union() {
        let mut a = ArtifactSet::from_lists(["w1", "w2"], ["u1"]);
        let b = ArtifactSet::from_lists(["w2", "w3"], ["u1", "u2"]);
        a.merge(&b);
        let once = a.clone();
        a.merge(&b);
        assert_eq!(a, once);
        assert_eq!(a.len(ArtifactFamily::Windows), 3);
        assert_eq!(a.len(ArtifactFamily::Unix), 2);
    }

    #[test]
    fn test_missing_from_reports_per_family() {
        let current = ArtifactSet::from_lists(["w1"], ["u1"]);
        let existing = ArtifactSet::from_lists(["w1", "w2"], ["u1"]);
        assert_eq!(
            current.missing_from(&existing, ArtifactFamily::Windows),
            vec!["w2".to_string()]
        );
        assert!(current
            .missing_from(&existing, ArtifactFamily::Unix)
            .is_empty());
    }

    #[test]
    fn test_wire_names() {
        let set = ArtifactSet::from_lists(["a.see"], ["b.sh"]);
        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value["WinBinaries"][0], "a.see");
        assert_eq!(value["UnixBinaries"][0], "b.sh");

        let parsed: ArtifactSet = serde_json::from_str(r#"{"WinBinaries":["x","x"]}"#).unwrap();
        assert_eq!(parsed.len(ArtifactFamily::Windows), 1);
        assert!(parsed.unix().is_empty());
    }
}
