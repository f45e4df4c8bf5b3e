//! Safe output filenames derived from URLs.

use pagemill_types::OutputFormat;
use url::Url;

/// Derive a filesystem-safe filename from a URL path.
///
/// Path segments are joined with `_`, characters unsafe on common
/// filesystems become `_`, an empty path becomes `index`, and the
/// format extension replaces any existing one. Query strings are
/// ignored.
#[must_use]
pub fn filename_from_url(url: &str, format: OutputFormat) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());

    let joined = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    let mut filename = if joined.is_empty() {
        "index".to_string()
    } else {
        sanitize(&joined)
    };

    let extension = format!(".{}", format.extension());
    if !filename.ends_with(&extension) {
        if let Some(dot) = filename.rfind('.') {
            filename.truncate(dot);
        }
        filename.push_str(&extension);
    }
    filename
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::filename_from_url;
    use pagemill_types::OutputFormat;

    #[test]
    fn test_path_segments_joined() {
        assert_eq!(
            filename_from_url("https://example.com/path/to/page", OutputFormat::Markdown),
            "path_to_page.md"
        );
    }

    #[test]
    fn test_empty_path_is_index() {
        assert_eq!(
            filename_from_url("https://example.com/", OutputFormat::Json),
            "index.json"
        );
        assert_eq!(
            filename_from_url("https://example.com", OutputFormat::Xml),
            "index.xml"
        );
    }

    #[test]
    fn test_existing_extension_replaced() {
        assert_eq!(
            filename_from_url("https://example.com/docs/page.html", OutputFormat::Markdown),
            "docs_page.md"
        );
    }

    #[test]
    fn test_unsafe_characters_sanitized() {
        assert_eq!(
            filename_from_url("https://example.com/a%22b", OutputFormat::Markdown),
            "a%22b.md"
        );
        // Encoded path keeps its percent escapes; raw unsafe characters
        // in a non-URL input are replaced.
        assert_eq!(
            filename_from_url("weird*name?here", OutputFormat::Markdown),
            "weird_name_here.md"
        );
    }

    #[test]
    fn test_query_string_ignored() {
        assert_eq!(
            filename_from_url("https://example.com/page?x=1&y=2", OutputFormat::Markdown),
            "page.md"
        );
    }

    #[test]
    fn test_format_extension_applied() {
        assert_eq!(
            filename_from_url("https://example.com/data", OutputFormat::Json),
            "data.json"
        );
        assert_eq!(
            filename_from_url("https://example.com/data", OutputFormat::Xml),
            "data.xml"
        );
    }
}
