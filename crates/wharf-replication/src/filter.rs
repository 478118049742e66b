//! Resource filters.
//!
//! Patterns are globs: `*` and `?` stay within one path segment, `**`
//! crosses segments and `{a,b}` lists alternatives. A pattern without meta
//! characters names its targets outright, which lets adapters check them
//! directly instead of listing everything.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::AdapterError;
use crate::model::{Artifact, Filter, Resource};

const META: &[char] = &['*', '?', '[', ']', '\\'];

/// Compiles `pattern`.
///
/// # Errors
///
/// Returns [`AdapterError::InvalidPattern`] when the glob is malformed.
pub fn compile(pattern: &str) -> Result<GlobMatcher, AdapterError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| AdapterError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// Reports whether `value` matches `pattern`. An empty pattern matches
/// everything.
///
/// # Errors
///
/// Returns [`AdapterError::InvalidPattern`] when the glob is malformed.
pub fn matches(pattern: &str, value: &str) -> Result<bool, AdapterError> {
    if pattern.is_empty() {
        return Ok(true);
    }
    Ok(compile(pattern)?.is_match(value))
}

/// Expands a single path component without wildcards into the names it
/// denotes: `library` gives `[library]`, `{a,b}` gives `[a, b]`.
///
/// Returns `None` when the component contains wildcards or is empty.
///
/// ```
/// use wharf_replication::filter::specific_component;
///
/// assert_eq!(specific_component("{team,ops}"), Some(vec!["team".to_string(), "ops".to_string()]));
/// assert_eq!(specific_component("team*"), None);
/// ```
#[must_use]
pub fn specific_component(component: &str) -> Option<Vec<String>> {
    if component.is_empty() || component.contains(META) || component.contains('/') {
        return None;
    }
    if let Some(inner) = component.strip_prefix('{').and_then(|c| c.strip_suffix('}')) {
        if inner.contains(['{', '}']) {
            return None;
        }
        let names: Vec<String> = inner
            .split(',')
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        return (!names.is_empty()).then_some(names);
    }
    if component.contains(['{', '}']) {
        return None;
    }
    Some(vec![component.to_string()])
}

/// Expands a path pattern whose every component is specific into the full
/// paths it denotes. Returns `None` when any component has wildcards.
#[must_use]
pub fn specific_paths(pattern: &str) -> Option<Vec<String>> {
    let mut paths = vec![String::new()];
    for component in pattern.split('/') {
        let names = specific_component(component)?;
        paths = paths
            .iter()
            .flat_map(|prefix| {
                names.iter().map(move |name| {
                    if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{prefix}/{name}")
                    }
                })
            })
            .collect();
    }
    Some(paths)
}

/// The pattern of the first name filter, if any.
#[must_use]
pub fn name_pattern(filters: &[Filter]) -> Option<&str> {
    filters.iter().find_map(|f| match f {
        Filter::Name(pattern) => Some(pattern.as_str()),
        _ => None,
    })
}

/// Keeps the repository names matching every name filter.
///
/// # Errors
///
/// Returns [`AdapterError::InvalidPattern`] for a malformed pattern.
pub fn filter_repositories(names: Vec<String>, filters: &[Filter]) -> Result<Vec<String>, AdapterError> {
    let mut matchers = Vec::new();
    for filter in filters {
        if let Filter::Name(pattern) = filter {
            if !pattern.is_empty() {
                matchers.push(compile(pattern)?);
            }
        }
    }
    Ok(names
        .into_iter()
        .filter(|name| matchers.iter().all(|m| m.is_match(name)))
        .collect())
}

/// Applies tag and label filters. Tags not matching a tag filter are
/// dropped; an artifact left without tags, or missing a required label, is
/// dropped.
///
/// # Errors
///
/// Returns [`AdapterError::InvalidPattern`] for a malformed pattern.
pub fn filter_artifacts(artifacts: Vec<Artifact>, filters: &[Filter]) -> Result<Vec<Artifact>, AdapterError> {
    let mut kept = artifacts;
    for filter in filters {
        match filter {
            Filter::Tag(pattern) if !pattern.is_empty() => {
                let matcher = compile(pattern)?;
                kept = kept
                    .into_iter()
                    .filter_map(|mut artifact| {
                        artifact.tags.retain(|t| matcher.is_match(t));
                        (!artifact.tags.is_empty()).then_some(artifact)
                    })
                    .collect();
            }
            Filter::Label(labels) => {
                kept.retain(|artifact| labels.iter().all(|l| artifact.labels.contains(l)));
            }
            _ => {}
        }
    }
    Ok(kept)
}

/// Keeps the resources whose type is accepted by every resource filter.
#[must_use]
pub fn filter_resources(resources: Vec<Resource>, filters: &[Filter]) -> Vec<Resource> {
    resources
        .into_iter()
        .filter(|r| {
            filters.iter().all(|f| match f {
                Filter::Resource(kind) => r.resource_type == *kind,
                _ => true,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceType;
    use proptest::prelude::*;

    #[test]
    fn test_glob_semantics() {
        assert!(matches("library/*", "library/hello").unwrap());
        assert!(!matches("library/*", "library/team/hello").unwrap());
        assert!(matches("library/**", "library/team/hello").unwrap());
        assert!(matches("{library,team}/hel?o", "team/hello").unwrap());
        assert!(matches("", "anything").unwrap());
        assert!(matches("v1.[0-9]", "v1.7").unwrap());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = matches("library/[", "library/x").unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPattern { .. }));
    }

    #[test]
    fn test_specific_paths() {
        assert_eq!(
            specific_paths("{library,team}/hello"),
            Some(vec!["library/hello".to_string(), "team/hello".to_string()])
        );
        assert_eq!(specific_paths("library/hello"), Some(vec!["library/hello".to_string()]));
        assert_eq!(specific_paths("library/*"), None);
        assert_eq!(specific_paths("library/"), None);
        assert_eq!(specific_component("{a,{b}}"), None);
        assert_eq!(specific_component("a{b"), None);
    }

    #[test]
    fn test_filter_artifacts() {
        let artifacts = vec![
            Artifact {
                tags: vec!["v1.0".into(), "latest".into()],
                labels: vec!["prod".into()],
                ..Artifact::default()
            },
            Artifact {
                tags: vec!["dev".into()],
                labels: vec!["prod".into()],
                ..Artifact::default()
            },
            Artifact::tagged("v2.0"),
        ];
        let filters = [Filter::Tag("v*".into()), Filter::Label(vec!["prod".into()])];
        let kept = filter_artifacts(artifacts, &filters).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].tags, ["v1.0"]);
    }

    #[test]
    fn test_filter_repositories_and_resources() {
        let names = vec!["library/hello".to_string(), "team/app".to_string()];
        let kept = filter_repositories(names, &[Filter::Name("library/*".into())]).unwrap();
        assert_eq!(kept, ["library/hello"]);

        let resources = vec![Resource::image("library/hello", Vec::new())];
        assert!(filter_resources(resources.clone(), &[Filter::Resource(ResourceType::Chart)]).is_empty());
        assert_eq!(filter_resources(resources, &[Filter::Resource(ResourceType::Image)]).len(), 1);
    }

    proptest! {
        #[test]
        fn prop_literal_component_is_specific(name in "[a-z0-9][a-z0-9._-]{0,20}") {
            prop_assert_eq!(specific_component(&name), Some(vec![name.clone()]));
            prop_assert!(matches(&name, &name).unwrap());
        }
    }
}
