// src/utils/mapper.rs

//! Mapping between published source URIs and local destination paths.

use crate::error::{AppError, Result};

/// A single prefix map from source URI to destination path.
///
/// Both sides use `/` as separator; trailing slashes are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Map {
    pub src_uri: String,
    pub dst_path: String,
}

impl Map {
    pub fn new(src_uri: &str, dst_path: &str) -> Self {
        Self {
            src_uri: src_uri.trim_end_matches('/').to_string(),
            dst_path: dst_path.trim_end_matches('/').to_string(),
        }
    }

    pub fn src_to_dst(&self, src_uri: &str) -> Option<String> {
        src_uri
            .strip_prefix(&format!("{}/", self.src_uri))
            .map(|rel| format!("{}/{}", self.dst_path, rel))
    }

    pub fn dst_to_src(&self, dst_path: &str) -> Option<String> {
        dst_path
            .strip_prefix(&format!("{}/", self.dst_path))
            .map(|rel| format!("{}/{}", self.src_uri, rel))
    }
}

/// Ordered list of maps, tried first to last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapper {
    maps: Vec<Map>,
}

impl Mapper {
    /// Parse mapping strings.
    ///
    /// Exactly two strings without `=` are read as `[src_uri, dst_path]`.
    /// Otherwise every string must be `src_uri=dst_path`.
    pub fn parse<S: AsRef<str>>(mappings: &[S]) -> Result<Self> {
        let mut mapper = Self::default();

        if mappings.len() == 2 && mappings.iter().all(|m| !m.as_ref().contains('=')) {
            mapper
                .maps
                .push(Map::new(mappings[0].as_ref(), mappings[1].as_ref()));
            return Ok(mapper);
        }

        for mapping in mappings {
            let mapping = mapping.as_ref();
            let parts: Vec<&str> = mapping.split('=').collect();
            let (src_uri, dst_path) = match parts.as_slice() {
                [src, dst] => (*src, *dst),
                _ => {
                    return Err(AppError::mapper(format!(
                        "Bad mapping argument ({mapping})"
                    )));
                }
            };
            let map = Map::new(src_uri, dst_path);
            for existing in &mapper.maps {
                if existing.src_uri == map.src_uri {
                    return Err(AppError::mapper(format!(
                        "Duplicate mapping for source URI {src_uri}"
                    )));
                }
                if existing.dst_path == map.dst_path {
                    return Err(AppError::mapper(format!(
                        "Duplicate mapping for destination path {dst_path}"
                    )));
                }
            }
            mapper.maps.push(map);
        }
        Ok(mapper)
    }

    /// Number of maps.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Translate a source URI into a destination path.
    pub fn src_to_dst(&self, src_uri: &str) -> Result<String> {
        self.maps
            .iter()
            .find_map(|m| m.src_to_dst(src_uri))
            .ok_or_else(|| {
                AppError::mapper(format!(
                    "Unable to translate source URI ({src_uri}) into a destination path"
                ))
            })
    }

    /// Translate a destination path into a source URI.
    pub fn dst_to_src(&self, dst_path: &str) -> Result<String> {
        self.maps
            .iter()
            .find_map(|m| m.dst_to_src(dst_path))
            .ok_or_else(|| {
                AppError::mapper(format!(
                    "Unable to translate destination path ({dst_path}) into a source URI"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_plain_strings() {
        let m = Mapper::parse(&["http://localhost:8888/", "/tmp/static"]).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(
            m.src_to_dst("http://localhost:8888/sitemap00001.xml").unwrap(),
            "/tmp/static/sitemap00001.xml"
        );
        assert_eq!(
            m.dst_to_src("/tmp/static/sitemap.xml").unwrap(),
            "http://localhost:8888/sitemap.xml"
        );
    }

    #[test]
    fn test_equals_pairs_tried_in_order() {
        let m = Mapper::parse(&["http://a.org/=/tmp/a", "http://b.org=/tmp/b", "http://c.org=/tmp/c"])
            .unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!(m.src_to_dst("http://b.org/x/y").unwrap(), "/tmp/b/x/y");
        assert!(m.src_to_dst("http://d.org/x").is_err());
    }

    #[test]
    fn test_duplicates_rejected() {
        assert!(Mapper::parse(&["http://a.org=/tmp/a", "http://a.org=/tmp/b", "x=y"]).is_err());
        assert!(Mapper::parse(&["http://a.org=/tmp/a", "http://b.org=/tmp/a", "x=y"]).is_err());
    }

    #[test]
    fn test_bad_argument() {
        assert!(Mapper::parse(&["no-equals-here"]).is_err());
        assert!(Mapper::parse(&["a=b=c"]).is_err());
    }

    #[test]
    fn test_prefix_must_end_at_segment() {
        let m = Mapper::parse(&["http://a.org/data", "/tmp/data"]).unwrap();
        assert!(m.src_to_dst("http://a.org/database/x").is_err());
    }
}
