//! Best-effort extraction of signing material from the service's home HTML
//! and its on-demand script. The service changes these assets; every step
//! returns `Option` so callers can keep stale state instead of failing.

use std::sync::LazyLock;

use regex::Regex;

static VERIFICATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta[^>]+name=["']twitter-site-verification["'][^>]+content=["']([^"']+)["']"#)
        .expect("verification regex")
});

static VERIFICATION_RE_REV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta[^>]+content=["']([^"']+)["'][^>]+name=["']twitter-site-verification["']"#)
        .expect("verification regex (reversed)")
});

static ONDEMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]ondemand\.s['"]:\s*['"]([\w]*)['"]"#).expect("ondemand regex")
});

static INDICES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\w\[(\d{1,2})\],\s*16\)").expect("indices regex"));

static PATH_D_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<path[^>]*d=["']([^"']+)["'][^>]*fill=["']#1d9bf008["']"#).expect("path regex")
});

static PATH_FILL_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<path[^>]*fill=["']#1d9bf008["'][^>]*d=["']([^"']+)["']"#)
        .expect("path regex (fill first)")
});

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d+").expect("number regex"));

/// Verification key from the `twitter-site-verification` meta tag, in
/// either attribute order.
pub fn verification_key(html: &str) -> Option<String> {
    VERIFICATION_RE
        .captures(html)
        .or_else(|| VERIFICATION_RE_REV.captures(html))
        .map(|c| c[1].to_string())
}

/// URL of the on-demand script referenced by the home HTML, rooted at the
/// given base.
pub fn ondemand_url(html: &str, base: &str) -> Option<String> {
    ONDEMAND_RE
        .captures(html)
        .map(|c| format!("{base}/ondemand.s.{}a.js", &c[1]))
}

/// All `(<var>[<N>], 16)` occurrences in the script. The first index is the
/// row index; the rest select key bytes.
pub fn key_indices(js: &str) -> Option<(usize, Vec<usize>)> {
    let indices: Vec<usize> = INDICES_RE
        .captures_iter(js)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    let (&row, rest) = indices.split_first()?;
    Some((row, rest.to_vec()))
}

/// Animation frame rows for the four `loading-x-anim-<i>` SVGs. A missing
/// SVG leaves its slot empty.
pub fn svg_frames(html: &str) -> Vec<Option<Vec<Vec<i64>>>> {
    (0..4)
        .map(|i| {
            let svg_re = Regex::new(&format!(
                r#"<svg[^>]*id=["']loading-x-anim-{i}["'][^>]*>[\s\S]*?</svg>"#
            ))
            .ok()?;
            let svg = svg_re.find(html)?.as_str();
            let d = PATH_D_FIRST_RE
                .captures(svg)
                .or_else(|| PATH_FILL_FIRST_RE.captures(svg))
                .map(|c| c[1].to_string())?;
            let rows = parse_path_data(&d);
            (!rows.is_empty()).then_some(rows)
        })
        .collect()
}

/// Splits an SVG path's `d` attribute on `C`; each non-first segment
/// contributes one row of signed integers.
pub fn parse_path_data(path_data: &str) -> Vec<Vec<i64>> {
    path_data
        .split('C')
        .skip(1)
        .filter_map(|part| {
            let row: Vec<i64> = NUMBER_RE
                .find_iter(part)
                .filter_map(|m| m.as_str().parse().ok())
                .collect();
            (!row.is_empty()).then_some(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_key_both_attribute_orders() {
        let a = r#"<meta name="twitter-site-verification" content="abc123+/="/>"#;
        let b = r#"<meta content="abc123+/=" name="twitter-site-verification"/>"#;
        assert_eq!(verification_key(a).as_deref(), Some("abc123+/="));
        assert_eq!(verification_key(b).as_deref(), Some("abc123+/="));
        assert!(verification_key("<html></html>").is_none());
    }

    #[test]
    fn ondemand_url_from_js_literal() {
        let base = crate::constants::ONDEMAND_BASE;
        let html = r#"stuff {"ondemand.s":"1a2b3c"} stuff"#;
        assert_eq!(
            ondemand_url(html, base).as_deref(),
            Some("https://abs.twimg.com/responsive-web/client-web/ondemand.s.1a2b3ca.js")
        );
        let single = "stuff 'ondemand.s': 'ffee' stuff";
        assert_eq!(
            ondemand_url(single, base).as_deref(),
            Some("https://abs.twimg.com/responsive-web/client-web/ondemand.s.ffeea.js")
        );
        assert!(ondemand_url("nothing here", base).is_none());
    }

    #[test]
    fn key_indices_first_is_row() {
        let js = "x(a[5], 16) y (b[12],16) z(c[0], 16)";
        let (row, rest) = key_indices(js).unwrap();
        assert_eq!(row, 5);
        assert_eq!(rest, vec![12, 0]);
        assert!(key_indices("no indices").is_none());
    }

    #[test]
    fn svg_frame_extraction_selects_animation_path() {
        let html = concat!(
            r##"<svg id="loading-x-anim-0"><path d="M0 0C1 2 3C-4 5 6" fill="#1d9bf008"/></svg>"##,
            r##"<svg id="loading-x-anim-2"><path fill="#1d9bf008" d="M0 0C7 8 9"/></svg>"##,
        );
        let frames = svg_frames(html);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].as_ref().unwrap(), &vec![vec![1, 2, 3], vec![-4, 5, 6]]);
        assert!(frames[1].is_none());
        assert_eq!(frames[2].as_ref().unwrap(), &vec![vec![7, 8, 9]]);
        assert!(frames[3].is_none());
    }

    #[test]
    fn path_rows_skip_the_move_segment() {
        let rows = parse_path_data("M0 0 0 0C10 20 30 40C-1 -2 -3");
        assert_eq!(rows, vec![vec![10, 20, 30, 40], vec![-1, -2, -3]]);
        assert!(parse_path_data("M0 0").is_empty());
    }
}
