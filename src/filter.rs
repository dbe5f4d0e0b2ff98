//! Branch filter
//!
//! Decides whether a (shortened) branch name may trigger a build. Callers strip the
//! `refs/heads/` prefix before asking.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid branch pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid target branch regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchFilterMode {
    #[default]
    All,
    IncludeExclude,
    #[serde(alias = "regex")]
    RegexAgainstTarget,
}

/// Filter settings as written in the job configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BranchFilterSpec {
    pub mode: BranchFilterMode,
    /// Comma or newline separated glob patterns.
    pub include: String,
    pub exclude: String,
    pub target_branch_regex: String,
}

/// Compiled branch filter. Built once per job at config load.
#[derive(Debug, Clone, Default)]
pub enum BranchFilter {
    #[default]
    All,
    IncludeExclude {
        /// `None` when no include pattern is configured.
        include: Option<GlobSet>,
        exclude: GlobSet,
    },
    Regex(Regex),
}

impl BranchFilter {
    pub fn new(spec: &BranchFilterSpec) -> Result<Self, FilterError> {
        match spec.mode {
            BranchFilterMode::All => Ok(BranchFilter::All),
            BranchFilterMode::IncludeExclude => {
                let include = split_patterns(&spec.include);
                let exclude = split_patterns(&spec.exclude);
                let include = if include.is_empty() {
                    None
                } else {
                    Some(build_set(&include)?)
                };
                Ok(BranchFilter::IncludeExclude {
                    include,
                    exclude: build_set(&exclude)?,
                })
            }
            BranchFilterMode::RegexAgainstTarget => {
                let pattern = spec.target_branch_regex.trim();
                // an empty regex filters nothing
                if pattern.is_empty() {
                    return Ok(BranchFilter::All);
                }
                let anchored = format!("^(?:{pattern})$");
                Regex::new(&anchored)
                    .map(BranchFilter::Regex)
                    .map_err(|source| FilterError::InvalidRegex {
                        pattern: pattern.to_string(),
                        source,
                    })
            }
        }
    }

    pub fn is_allowed(&self, branch: &str) -> bool {
        match self {
            BranchFilter::All => true,
            BranchFilter::IncludeExclude { include, exclude } => {
                let included = include.as_ref().is_none_or(|set| set.is_match(branch));
                included && !exclude.is_match(branch)
            }
            BranchFilter::Regex(re) => re.is_match(branch),
        }
    }
}

/// Splits a pattern list on commas and newlines, trimming blanks away.
pub fn split_patterns(spec: &str) -> Vec<String> {
    spec.split([',', '\n'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// `*` stays within one path segment, `**` crosses segments.
pub fn compile_glob(pattern: &str) -> Result<Glob, FilterError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| FilterError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })
}

fn build_set(patterns: &[String]) -> Result<GlobSet, FilterError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(pattern)?);
    }
    builder.build().map_err(|source| FilterError::InvalidGlob {
        pattern: patterns.join(","),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn include_exclude(include: &str, exclude: &str) -> BranchFilter {
        BranchFilter::new(&BranchFilterSpec {
            mode: BranchFilterMode::IncludeExclude,
            include: include.to_string(),
            exclude: exclude.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn regex(pattern: &str) -> BranchFilter {
        BranchFilter::new(&BranchFilterSpec {
            mode: BranchFilterMode::RegexAgainstTarget,
            target_branch_regex: pattern.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn all_allows_everything() {
        let filter = BranchFilter::new(&BranchFilterSpec::default()).unwrap();
        assert!(filter.is_allowed("main"));
        assert!(filter.is_allowed(""));
    }

    #[test]
    fn split_handles_commas_newlines_and_whitespace() {
        assert_eq!(
            split_patterns(" main ,release/*\n\n hotfix-* ,"),
            vec!["main", "release/*", "hotfix-*"]
        );
        assert!(split_patterns("  \n , ").is_empty());
    }

    #[test]
    fn include_only() {
        let filter = include_exclude("main, release/*", "");
        assert!(filter.is_allowed("main"));
        assert!(filter.is_allowed("release/1.2"));
        assert!(!filter.is_allowed("release/1.2/rc"));
        assert!(!filter.is_allowed("feature/x"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter = include_exclude("feature/**", "feature/wip-*");
        assert!(filter.is_allowed("feature/login"));
        assert!(filter.is_allowed("feature/a/b"));
        assert!(!filter.is_allowed("feature/wip-login"));
    }

    #[test]
    fn empty_include_means_everything_not_excluded() {
        let filter = include_exclude("", "experimental\ntmp-*");
        assert!(filter.is_allowed("main"));
        assert!(!filter.is_allowed("experimental"));
        assert!(!filter.is_allowed("tmp-1"));
    }

    #[test]
    fn regex_is_a_full_match() {
        let filter = regex("release-\\d+");
        assert!(filter.is_allowed("release-12"));
        assert!(!filter.is_allowed("release-12-hotfix"));
        assert!(!filter.is_allowed("my-release-12"));
    }

    #[test]
    fn regex_alternation_is_anchored_as_a_whole() {
        let filter = regex("main|develop");
        assert!(filter.is_allowed("main"));
        assert!(filter.is_allowed("develop"));
        assert!(!filter.is_allowed("main2"));
    }

    #[test]
    fn empty_regex_allows_all() {
        assert!(regex("").is_allowed("anything"));
    }

    #[test]
    fn invalid_patterns_are_reported() {
        let err = BranchFilter::new(&BranchFilterSpec {
            mode: BranchFilterMode::RegexAgainstTarget,
            target_branch_regex: "(".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, FilterError::InvalidRegex { .. }));

        let err = BranchFilter::new(&BranchFilterSpec {
            mode: BranchFilterMode::IncludeExclude,
            include: "release/[".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, FilterError::InvalidGlob { .. }));
    }

    #[test]
    fn mode_names_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            branch_filter: BranchFilterSpec,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [branch_filter]
            mode = "regex"
            target_branch_regex = "main"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.branch_filter.mode, BranchFilterMode::RegexAgainstTarget);

        let parsed: Wrapper = toml::from_str(
            r#"
            [branch_filter]
            mode = "include_exclude"
            include = "main"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.branch_filter.mode, BranchFilterMode::IncludeExclude);
        assert_eq!(parsed.branch_filter.exclude, "");
    }

    fn pattern() -> impl Strategy<Value = String> {
        "[ab]{0,2}\\*?[ab]{0,2}(/[ab]{0,2}\\*?[ab]{0,2})?"
    }

    fn branch() -> impl Strategy<Value = String> {
        "[ab]{1,3}(/[ab]{1,3})?"
    }

    proptest! {
        #[test]
        fn prop_include_exclude_law(
            includes in proptest::collection::vec(pattern(), 0..3),
            excludes in proptest::collection::vec(pattern(), 0..3),
            name in branch()
        ) {
            let filter = include_exclude(&includes.join(","), &excludes.join("\n"));

            let matches = |p: &String| compile_glob(p).unwrap().compile_matcher().is_match(&name);
            let includes: Vec<String> = includes.into_iter().filter(|p| !p.trim().is_empty()).collect();
            let excludes: Vec<String> = excludes.into_iter().filter(|p| !p.trim().is_empty()).collect();
            let expected = (includes.is_empty() || includes.iter().any(matches))
                && !excludes.iter().any(matches);

            prop_assert_eq!(filter.is_allowed(&name), expected);
        }
    }
}
