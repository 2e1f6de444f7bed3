//! Conversion between the three path views of a synced file: the
//! pair-relative storage form, the percent-encoded `<d:href>` the server
//! returns, and the full request URL. Centralizing this prevents the URL
//! doubling and double-encoding issues that plague WebDAV integrations.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Number of href segments that address the DAV file root:
/// `remote.php/dav/files/<username>`.
const DAV_ROOT_SEGMENTS: usize = 4;

/// Converts a `<d:href>` value into the decoded user-root-relative path.
///
/// Input:  `/remote.php/dav/files/alice/Docs/hello%20world.txt`
/// Output: `Docs/hello world.txt`
///
/// The href addressing the DAV root itself yields `"/"`.
pub fn href_to_relative(href: &str) -> String {
    // Hrefs are path-only in practice, but tolerate absolute URLs.
    let path_part = match href.find("://") {
        Some(scheme_end) => match href[scheme_end + 3..].find('/') {
            Some(host_end) => &href[scheme_end + 3 + host_end..],
            None => "",
        },
        None => href,
    };

    let decoded: Vec<String> = path_part
        .split('/')
        .filter(|s| !s.is_empty())
        .skip(DAV_ROOT_SEGMENTS)
        .map(decode_segment)
        .collect();

    if decoded.is_empty() {
        "/".to_string()
    } else {
        decoded.join("/")
    }
}

/// Builds the full request URL for a resource below a pair's remote root.
///
/// `relative` may be empty to address the pair root itself. Spaces encode
/// as `%20`, never `+`.
pub fn relative_to_url(base_url: &str, username: &str, remote_root: &str, relative: &str) -> String {
    let mut url = format!(
        "{}/remote.php/dav/files/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(username)
    );
    for segment in remote_root.split('/').chain(relative.split('/')) {
        if segment.is_empty() {
            continue;
        }
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    url
}

/// Strips a pair's remote root from a user-root-relative path, yielding the
/// pair-relative storage form. Returns `None` for paths outside the pair
/// (including the root itself, which carries no file).
pub fn pair_relative(remote_root: &str, user_relative: &str) -> Option<String> {
    let root = remote_root.trim_matches('/');
    if root.is_empty() {
        if user_relative == "/" || user_relative.is_empty() {
            return None;
        }
        return Some(user_relative.to_string());
    }
    let rest = user_relative.strip_prefix(root)?;
    let rest = rest.strip_prefix('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Platform-native location of a pair-relative path below the local root.
pub fn local_path_for(local_root: &str, relative: &str) -> PathBuf {
    let mut path = PathBuf::from(local_root);
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// Converts a local path below `local_root` into the forward-slash storage
/// form. Returns `None` for paths outside the root.
pub fn relative_of_local(local_root: &Path, local_path: &Path) -> Option<String> {
    let rel = local_path.strip_prefix(local_root).ok()?;
    let segments: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .unwrap_or_else(|_| Cow::Borrowed(segment))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_href_to_relative_drops_dav_root() {
        let href = "/remote.php/dav/files/testuser/Photos/image.jpg";
        assert_eq!(href_to_relative(href), "Photos/image.jpg");
    }

    #[test]
    fn test_href_to_relative_decodes_percent_escapes() {
        let href = "/remote.php/dav/files/testuser/Docs/hello%20world.txt";
        assert_eq!(href_to_relative(href), "Docs/hello world.txt");
    }

    #[test]
    fn test_href_of_the_root_is_the_slash_sentinel() {
        assert_eq!(href_to_relative("/remote.php/dav/files/testuser/"), "/");
        assert_eq!(href_to_relative("/remote.php/dav/files/testuser"), "/");
    }

    #[test]
    fn test_href_with_absolute_url_form() {
        let href = "https://nc.example/remote.php/dav/files/alice/a.txt";
        assert_eq!(href_to_relative(href), "a.txt");
    }

    #[test]
    fn test_relative_to_url_encodes_spaces_as_percent20() {
        let url = relative_to_url("https://nc.example/", "alice", "Docs", "a b.txt");
        assert_eq!(
            url,
            "https://nc.example/remote.php/dav/files/alice/Docs/a%20b.txt"
        );
        assert!(!url.contains('+'));
    }

    #[test]
    fn test_relative_to_url_with_empty_remote_root() {
        let url = relative_to_url("https://nc.example", "alice", "", "x/y.txt");
        assert_eq!(url, "https://nc.example/remote.php/dav/files/alice/x/y.txt");
    }

    #[test]
    fn test_url_href_round_trip() {
        // href_to_relative(relative_to_url(root, R)) must restore the
        // user-relative form for any R without leading/trailing slashes.
        for rel in ["a.txt", "nested/deep/file name.md", "ümläut.pdf"] {
            let url = relative_to_url("https://nc.example", "alice", "Docs", rel);
            assert_eq!(href_to_relative(&url), format!("Docs/{}", rel));
        }
    }

    #[test]
    fn test_pair_relative_strips_the_remote_root() {
        assert_eq!(
            pair_relative("Docs", "Docs/a.txt"),
            Some("a.txt".to_string())
        );
        assert_eq!(
            pair_relative("Docs", "Docs/sub/b.txt"),
            Some("sub/b.txt".to_string())
        );
        assert_eq!(pair_relative("Docs", "Docs"), None);
        assert_eq!(pair_relative("Docs", "Other/a.txt"), None);
        assert_eq!(pair_relative("", "a.txt"), Some("a.txt".to_string()));
        assert_eq!(pair_relative("", "/"), None);
    }

    #[test]
    fn test_local_path_for_joins_segments_natively() {
        let path = local_path_for("/tmp/p1", "sub/a.txt");
        assert_eq!(path, Path::new("/tmp/p1").join("sub").join("a.txt"));
    }

    #[test]
    fn test_relative_of_local_round_trip() {
        let root = Path::new("/tmp/p1");
        let local = local_path_for("/tmp/p1", "sub/a.txt");
        assert_eq!(
            relative_of_local(root, &local),
            Some("sub/a.txt".to_string())
        );
    }
}
