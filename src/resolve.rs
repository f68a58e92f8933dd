use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Literal string-prefix substitution applied to historical paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    pub original_prefix: String,
    pub mapped_prefix: String,
}

impl PathMapping {
    pub fn new(original_prefix: impl Into<String>, mapped_prefix: impl Into<String>) -> Self {
        Self {
            original_prefix: original_prefix.into(),
            mapped_prefix: mapped_prefix.into(),
        }
    }

    fn apply(&self, path: &str) -> Option<String> {
        path.strip_prefix(&self.original_prefix)
            .map(|rest| format!("{}{}", self.mapped_prefix, rest))
    }
}

impl std::str::FromStr for PathMapping {
    type Err = String;

    /// Parse `OLD=NEW`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (original, mapped) = s
            .split_once('=')
            .ok_or_else(|| format!("expected OLD=NEW, got '{}'", s))?;
        if original.is_empty() {
            return Err("original prefix must not be empty".to_string());
        }
        Ok(Self::new(original, mapped))
    }
}

/// Rewrite `path` with the first mapping whose prefix matches, in the order given.
///
/// Paths that are not valid UTF-8 or match no mapping come back unchanged.
pub fn remap(path: &Path, mappings: &[PathMapping]) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    mappings
        .iter()
        .find_map(|m| m.apply(text))
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_prefix_wins() {
        let mappings = vec![
            PathMapping::new("/old/mount", "/new/mount"),
            PathMapping::new("/old", "/elsewhere"),
        ];
        assert_eq!(
            remap(Path::new("/old/mount/docs/a.pdf"), &mappings),
            PathBuf::from("/new/mount/docs/a.pdf")
        );
        assert_eq!(
            remap(Path::new("/old/other/a.pdf"), &mappings),
            PathBuf::from("/elsewhere/other/a.pdf")
        );
        assert_eq!(
            remap(Path::new("/unrelated/a.pdf"), &mappings),
            PathBuf::from("/unrelated/a.pdf")
        );
    }

    #[test]
    fn no_mappings_is_identity() {
        assert_eq!(remap(Path::new("/a/b"), &[]), PathBuf::from("/a/b"));
    }

    #[test]
    fn parses_cli_form() {
        let mapping: PathMapping = "/Volumes/Data=/mnt/data".parse().unwrap();
        assert_eq!(mapping, PathMapping::new("/Volumes/Data", "/mnt/data"));
        assert!("no-separator".parse::<PathMapping>().is_err());
        assert!("=/x".parse::<PathMapping>().is_err());
    }
}
