//! Listing values exchanged between the store, the translator and the host.
//!
//! Everything here is request-scoped: built fresh for one listing call and
//! dropped once the response is rendered.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One stored object as reported by a list call.
///
/// A `size` of zero marks a folder placeholder created by console tools, not
/// an empty file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A pseudo-directory: every key sharing this `/`-terminated prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixEntry {
    pub prefix: String,
}

/// One item of a rendered listing, either a folder or a file.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ListingNode {
    Directory {
        title: String,
        /// Always empty; folders are loaded on demand.
        children: Vec<ListingNode>,
        /// Path the host sends back to list this folder.
        path: String,
    },
    File {
        title: String,
        size: u64,
        #[serde(rename = "datemodified", with = "chrono::serde::ts_seconds_option")]
        modified_at: Option<DateTime<Utc>>,
        path: String,
        /// Key handed back on fetch, relative to the instance base path.
        #[serde(rename = "source")]
        source_key: String,
    },
}

impl ListingNode {
    pub fn directory(title: impl Into<String>, path: impl Into<String>) -> Self {
        ListingNode::Directory {
            title: title.into(),
            children: Vec::new(),
            path: path.into(),
        }
    }

    #[cfg(test)]
    pub fn title(&self) -> &str {
        match self {
            ListingNode::Directory { title, .. } | ListingNode::File { title, .. } => title,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &str {
        match self {
            ListingNode::Directory { path, .. } | ListingNode::File { path, .. } => path,
        }
    }

    #[cfg(test)]
    pub fn is_directory(&self) -> bool {
        matches!(self, ListingNode::Directory { .. })
    }
}

/// One step of the trail from the bucket root to the listed folder.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
}

impl Breadcrumb {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Result of translating one prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Directories first, then files, each in store order.
    pub nodes: Vec<ListingNode>,
    /// Trail for the requested path, root excluded.
    pub breadcrumbs: Vec<Breadcrumb>,
}

/// Behaviour flags the host file picker reads alongside a listing.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingFlags {
    pub manage: bool,
    pub dynload: bool,
    pub nologin: bool,
    pub nosearch: bool,
}

impl Default for ListingFlags {
    fn default() -> Self {
        Self {
            manage: false,
            dynload: true,
            nologin: true,
            nosearch: true,
        }
    }
}

/// The listing as rendered for the host: nodes, full trail and flags.
#[derive(Serialize, Debug, Clone)]
pub struct ListingResponse {
    pub list: Vec<ListingNode>,
    pub path: Vec<Breadcrumb>,
    #[serde(flatten)]
    pub flags: ListingFlags,
}

impl ListingResponse {
    /// Prepend a root crumb named after the bucket to the listing trail.
    pub fn new(bucket: &str, listing: Listing) -> Self {
        let mut path = Vec::with_capacity(listing.breadcrumbs.len() + 1);
        path.push(Breadcrumb::new(bucket, ""));
        path.extend(listing.breadcrumbs);
        Self {
            list: listing.nodes,
            path,
            flags: ListingFlags::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn response_prepends_bucket_root() {
        let listing = Listing {
            nodes: vec![ListingNode::directory("sub", "docs/sub/")],
            breadcrumbs: vec![Breadcrumb::new("docs", "docs/")],
        };
        let response = ListingResponse::new("course-files", listing);
        assert_eq!(response.path[0], Breadcrumb::new("course-files", ""));
        assert_eq!(response.path[1], Breadcrumb::new("docs", "docs/"));
        assert_eq!(response.list.len(), 1);
    }

    #[test]
    fn nodes_serialize_in_host_shape() {
        let modified = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let response = ListingResponse::new(
            "b",
            Listing {
                nodes: vec![
                    ListingNode::directory("sub", "docs/sub/"),
                    ListingNode::File {
                        title: "a.txt".into(),
                        size: 10,
                        modified_at: Some(modified),
                        path: "docs/a.txt".into(),
                        source_key: "docs/a.txt".into(),
                    },
                ],
                breadcrumbs: Vec::new(),
            },
        );

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "list": [
                    {"title": "sub", "children": [], "path": "docs/sub/"},
                    {
                        "title": "a.txt",
                        "size": 10,
                        "datemodified": modified.timestamp(),
                        "path": "docs/a.txt",
                        "source": "docs/a.txt"
                    }
                ],
                "path": [{"name": "b", "path": ""}],
                "manage": false,
                "dynload": true,
                "nologin": true,
                "nosearch": true
            })
        );
    }
}
