use sha2::{Digest, Sha256};
use url::Url;

use crate::asset::{DEFAULT_MANIFEST_FILE, MANIFEST_TMP_SUFFIX, PARTIAL_SUFFIX};

/// Prefix used for assets whose URL has no usable basename
const FALLBACK_PREFIX: &str = "asset-";

/// Number of digest bytes used in fallback names (16 hex characters)
const FALLBACK_DIGEST_BYTES: usize = 8;

/// Derive the cache file name for a media URL
///
/// The name is the last path segment with query string and fragment ignored,
/// so a signed URL whose token rotates keeps the same name. The basename is
/// sanitized for the local filesystem. URLs without a usable basename get a
/// stable name derived from a hash of the query-less URL, as do basenames the
/// cache keeps for itself (the manifest and `.partial` downloads).
pub fn derive_file_name(url: &Url) -> String {
    let basename = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");

    let sanitized = sanitize_filename::sanitize(basename);

    if matches!(sanitized.as_str(), "" | "." | "..") || is_reserved(&sanitized) {
        return fallback_file_name(url);
    }

    sanitized
}

fn is_reserved(name: &str) -> bool {
    name.ends_with(PARTIAL_SUFFIX)
        || name == DEFAULT_MANIFEST_FILE
        || name == format!("{DEFAULT_MANIFEST_FILE}{MANIFEST_TMP_SUFFIX}")
}

fn fallback_file_name(url: &Url) -> String {
    let mut stripped = url.clone();
    stripped.set_query(None);
    stripped.set_fragment(None);

    let digest = Sha256::digest(stripped.as_str().as_bytes());
    let hex: String = digest
        .iter()
        .take(FALLBACK_DIGEST_BYTES)
        .map(|byte| format!("{byte:02x}"))
        .collect();

    format!("{FALLBACK_PREFIX}{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(url: &str) -> String {
        derive_file_name(&Url::parse(url).unwrap())
    }

    #[test]
    fn uses_last_path_segment() {
        assert_eq!(name("https://cdn.example.com/media/img1.jpg"), "img1.jpg");
    }

    #[test]
    fn ignores_query_string() {
        assert_eq!(
            name("https://cdn.example.com/media/img1.jpg?token=X"),
            name("https://cdn.example.com/media/img1.jpg?token=Y")
        );
        assert_eq!(
            name("https://cdn.example.com/media/img1.jpg?token=X"),
            "img1.jpg"
        );
    }

    #[test]
    fn ignores_fragment() {
        assert_eq!(name("https://cdn.example.com/clip.mp4#t=10"), "clip.mp4");
    }

    #[test]
    fn same_basename_on_different_hosts_collides() {
        assert_eq!(
            name("https://a.example.com/x/logo.png"),
            name("https://b.example.com/y/logo.png")
        );
    }

    #[test]
    fn trailing_slash_falls_back_to_stable_hash() {
        let first = name("https://cdn.example.com/media/?token=1");
        let second = name("https://cdn.example.com/media/?token=2");

        assert!(first.starts_with(FALLBACK_PREFIX));
        assert_eq!(first.len(), FALLBACK_PREFIX.len() + 16);
        assert_eq!(first, second);
        assert_ne!(first, name("https://cdn.example.com/other/"));
    }

    #[test]
    fn keeps_percent_encoding_as_is() {
        assert_eq!(
            name("https://cdn.example.com/my%20video.mp4"),
            "my%20video.mp4"
        );
    }

    #[test]
    fn cache_owned_names_fall_back_to_hash() {
        for url in [
            "https://cdn.example.com/promo.partial",
            "https://cdn.example.com/setup.json",
            "https://cdn.example.com/setup.json.tmp",
        ] {
            let derived = name(url);
            assert!(derived.starts_with(FALLBACK_PREFIX), "{url} kept {derived}");
            assert_eq!(derived, name(&format!("{url}?token=rotated")));
        }

        assert_ne!(
            name("https://a.example.com/setup.json"),
            name("https://b.example.com/setup.json")
        );
        assert_eq!(name("https://cdn.example.com/setup.jsonl"), "setup.jsonl");
    }
}
