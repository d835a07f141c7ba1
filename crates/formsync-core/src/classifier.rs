//! Changed files and labels → artifact set.
//!
//! [`ArtifactClassifier::classify`] is a pure function of its inputs. Every
//! rule only adds artifacts, and the result is a pair of ordered sets, so
//! neither input order nor repeated application changes the outcome.

use std::path::Path;

use tracing::{info, warn};

use crate::domain::artifact::{classify_name, ArtifactFamily, ArtifactSet, Label};
use crate::domain::change::ChangeSet;

/// Aggregate message bundle implied by any archive of the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBundleRule {
    pub prefix: &'static str,
    pub suffix: &'static str,
    pub bundle: &'static str,
}

pub const MESSAGE_BUNDLE_RULES: [MessageBundleRule; 2] = [
    MessageBundleRule {
        prefix: "wc-",
        suffix: ".jar",
        bundle: "wc-messages.jar",
    },
    MessageBundleRule {
        prefix: "cv-ac-",
        suffix: ".jar",
        bundle: "cv-ac-messages.jar",
    },
];

/// Artifacts an official build lost relative to the existing form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRegression {
    pub family: ArtifactFamily,
    pub missing: Vec<String>,
}

/// Output of [`ArtifactClassifier::classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub artifacts: ArtifactSet,
    /// Non-empty only when a prior set was supplied and the freshly computed
    /// set was smaller in some family.
    pub regressions: Vec<ClassificationRegression>,
}

/// Maps changed files and labels to build artifacts.
pub struct ArtifactClassifier;

impl ArtifactClassifier {
    /// Compute the artifact set for a change.
    ///
    /// * `lookup`: per-family lists from the binary finder (either may be empty)
    /// * `changes`: changed paths; files that are themselves family-specific
    ///   artifacts (`.see`, `.cmd`, `.tar`, `.sh`) are included directly
    /// * `labels`: merge-request labels, classified by suffix
    /// * `prior`: the existing form's artifacts, supplied for official builds
    pub fn classify(
        lookup: &ArtifactSet,
        changes: &ChangeSet,
        labels: &[Label],
        prior: Option<&ArtifactSet>,
    ) -> Classification {
        let mut artifacts = lookup.clone();

        for path in changes.paths() {
            let name = file_name(path);
            if let Some(class) = classify_name(name) {
                for family in class.families() {
                    artifacts.insert(*family, name);
                }
            }
        }

        for label in labels {
            for family in label.classify().families() {
                artifacts.insert(*family, label.as_str());
            }
        }

        apply_message_bundles(&mut artifacts);

        let mut regressions = Vec::new();
        if let Some(prior) = prior {
            for family in ArtifactFamily::ALL {
                let missing = artifacts.missing_from(prior, family);
                if !missing.is_empty() {
                    warn!(
                        family = %family,
                        missing = ?missing,
                        "Build computed fewer binaries than the existing form; keeping the form's binaries"
                    );
                    regressions.push(ClassificationRegression { family, missing });
                }
            }
            artifacts.merge(prior);
        }

        info!(
            windows = artifacts.len(ArtifactFamily::Windows),
            unix = artifacts.len(ArtifactFamily::Unix),
            "Classified binaries"
        );

        Classification {
            artifacts,
            regressions,
        }
    }
}

fn apply_message_bundles(artifacts: &mut ArtifactSet) {
    for rule in MESSAGE_BUNDLE_RULES {
        if artifacts.contains(ArtifactFamily::Windows, rule.bundle) {
            continue;
        }
        let implied = artifacts
            .windows()
            .iter()
            .any(|name| name.starts_with(rule.prefix) && name.ends_with(rule.suffix));
        if implied {
            artifacts.insert(ArtifactFamily::Windows, rule.bundle);
            artifacts.insert(ArtifactFamily::Unix, rule.bundle);
        }
    }
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn labels(names: &[&str]) -> Vec<Label> {
        names.iter().map(|n| Label::new(*n)).collect()
    }

    fn names(set: &std::collections::BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_changed_scripts_and_tar_label() {
        let changes: ChangeSet = ["a.see", "b.sh"].into_iter().collect();
        let result =
            ArtifactClassifier::classify(&ArtifactSet::new(), &changes, &labels(&["extra.tar"]), None);

        assert_eq!(names(result.artifacts.windows()), vec!["a.see"]);
        assert_eq!(names(result.artifacts.unix()), vec!["b.sh", "extra.tar"]);
        assert!(result.regressions.is_empty());
    }

    #[test]
    fn test_plain_source_files_imply_nothing() {
        let changes: ChangeSet = ["src/app/login.js", "docs/README.md"].into_iter().collect();
        let result = ArtifactClassifier::classify(&ArtifactSet::new(), &changes, &[], None);
        assert!(result.artifacts.is_empty());
    }

    #[test]
    fn test_nested_script_uses_file_name() {
        let changes: ChangeSet = ["tools/install/setup.sh"].into_iter().collect();
        let result = ArtifactClassifier::classify(&ArtifactSet::new(), &changes, &[], None);
        assert_eq!(names(result.artifacts.unix()), vec!["setup.sh"]);
    }

    #[test]
    fn test_default_label_goes_to_both_except_sentinels() {
        let result = ArtifactClassifier::classify(
            &ArtifactSet::new(),
            &ChangeSet::new(),
            &labels(&["cv-ac-core.war", "cv-ac-master", "cv-wc-master"]),
            None,
        );
        assert_eq!(
            names(result.artifacts.windows()),
            vec!["cv-ac-core.war", "cv-ac-master", "cv-wc-master"]
        );
        assert_eq!(names(result.artifacts.unix()), vec!["cv-ac-core.war"]);
    }

    #[test]
    fn test_sh_label_never_reaches_windows() {
        let result = ArtifactClassifier::classify(
            &ArtifactSet::new(),
            &ChangeSet::new(),
            &labels(&["deploy.sh", "cvToolsBase.sh.tmpl"]),
            None,
        );
        assert!(result.artifacts.windows().is_empty());
        assert_eq!(
            names(result.artifacts.unix()),
            vec!["cvToolsBase.sh.tmpl", "deploy.sh"]
        );
    }

    #[test]
    fn test_message_bundle_added_to_both_families() {
        let lookup = ArtifactSet::from_lists(["wc-reports.jar", "cv-ac-admin.jar"], Vec::<String>::new());
        let result = ArtifactClassifier::classify(&lookup, &ChangeSet::new(), &[], None);

        for family in ArtifactFamily::ALL {
            assert!(result.artifacts.contains(family, "wc-messages.jar"));
            assert!(result.artifacts.contains(family, "cv-ac-messages.jar"));
        }
    }

    #[test]
    fn test_message_bundle_not_added_when_already_present() {
        let lookup = ArtifactSet::from_lists(["wc-reports.jar", "wc-messages.jar"], Vec::<String>::new());
        let result = ArtifactClassifier::classify(&lookup, &ChangeSet::new(), &[], None);
        assert!(!result.artifacts.contains(ArtifactFamily::Unix, "wc-messages.jar"));
    }

    #[test]
    fn test_message_bundle_requires_archive_suffix() {
        let lookup = ArtifactSet::from_lists(["wc-reports.see"], Vec::<String>::new());
        let result = ArtifactClassifier::classify(&lookup, &ChangeSet::new(), &[], None);
        assert!(!result.artifacts.contains(ArtifactFamily::Windows, "wc-messages.jar"));
    }

    #[test]
    fn test_prior_artifacts_unioned_and_regression_reported() {
        let lookup = ArtifactSet::from_lists(["a.see"], ["b.sh"]);
        let prior = ArtifactSet::from_lists(["a.see", "old.see"], ["b.sh"]);
        let result =
            ArtifactClassifier::classify(&lookup, &ChangeSet::new(), &[], Some(&prior));

        assert_eq!(names(result.artifacts.windows()), vec!["a.see", "old.see"]);
        assert_eq!(
            result.regressions,
            vec![ClassificationRegression {
                family: ArtifactFamily::Windows,
                missing: vec!["old.see".to_string()],
            }]
        );
    }

    #[test]
    fn test_deterministic_and_order_independent() {
        let changes_a: ChangeSet = ["x.cmd", "y.tar", "z.sh"].into_iter().collect();
        let changes_b: ChangeSet = ["z.sh", "x.cmd", "y.tar"].into_iter().collect();
        let labels_a = labels(&["cv-wc-master", "util.jar", "n.see"]);
        let labels_b = labels(&["n.see", "util.jar", "cv-wc-master"]);
        let lookup = ArtifactSet::from_lists(["wc-a.jar"], ["u"]);

        let first = ArtifactClassifier::classify(&lookup, &changes_a, &labels_a, None);
        let second = ArtifactClassifier::classify(&lookup, &changes_b, &labels_b, None);
        let again = ArtifactClassifier::classify(&first.artifacts, &changes_a, &labels_a, None);

        assert_eq!(first, second);
        assert_eq!(first.artifacts, again.artifacts);
    }
}
