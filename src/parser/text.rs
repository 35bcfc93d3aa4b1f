use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Collapse whitespace runs and drop control characters.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fold full-width ASCII (`ＪＳＴ`, `（Ｃ）`) to half-width and the ideographic
/// space to a plain space.
pub fn fold_width(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

/// Comparison key used for deduplication and merging.
pub fn match_key(s: &str) -> String {
    normalize(&fold_width(s)).to_lowercase()
}

/// Last path segment of a URL, ignoring query, fragment and trailing slash.
pub fn last_segment(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.trim_end_matches('/');
    let seg = path.rsplit('/').next()?;
    if seg.is_empty() || seg.contains(':') {
        None
    } else {
        Some(seg.to_string())
    }
}

pub fn absolutize(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else if href.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), href)
    }
}

// ── Periods ──

/// Project period: the raw text plus normalized `YYYY` / `YYYY-MM` bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub text: String,
    pub start: String,
    pub end: String,
}

impl Period {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

type Bounds = fn(&Captures) -> (String, String);

const SEP: &str = r"\s*(?:-|－|–|~|〜|～|から)\s*";

static PERIOD_PATTERNS: LazyLock<Vec<(Regex, Bounds)>> = LazyLock::new(|| {
    let p = |re: String, f: Bounds| (Regex::new(&re).unwrap(), f);
    vec![
        p(
            format!(r"(\d{{4}})年\s*(\d{{1,2}})月{SEP}(\d{{4}})年\s*(\d{{1,2}})月"),
            |c| (ym(&c[1], &c[2]), ym(&c[3], &c[4])),
        ),
        p(
            format!(r"(\d{{4}})[./](\d{{1,2}}){SEP}(\d{{4}})[./](\d{{1,2}})"),
            |c| (ym(&c[1], &c[2]), ym(&c[3], &c[4])),
        ),
        p(
            format!(r"(令和|平成)(\d{{1,2}}|元)年度?{SEP}(令和|平成)(\d{{1,2}}|元)年度?"),
            |c| (era_year(&c[1], &c[2]), era_year(&c[3], &c[4])),
        ),
        p(
            r"FY\s*(\d{4})\s*-\s*FY\s*(\d{4})".to_string(),
            |c| (c[1].to_string(), c[2].to_string()),
        ),
        p(
            format!(r"(\d{{4}})年度?{SEP}(\d{{4}})年度?"),
            |c| (c[1].to_string(), c[2].to_string()),
        ),
        p(
            r"\b((?:19|20)\d{2})\s*-\s*((?:19|20)\d{2})\b".to_string(),
            |c| (c[1].to_string(), c[2].to_string()),
        ),
    ]
});

fn ym(year: &str, month: &str) -> String {
    let m: u32 = month.parse().unwrap_or(0);
    format!("{}-{:02}", year, m)
}

fn era_year(era: &str, year: &str) -> String {
    let n: i32 = if year == "元" { 1 } else { year.parse().unwrap_or(0) };
    let base = match era {
        "令和" => 2018,
        _ => 1988,
    };
    (base + n).to_string()
}

/// Find the first period expression in `text`.
pub fn parse_period(text: &str) -> Option<Period> {
    let folded = fold_width(text);
    PERIOD_PATTERNS.iter().find_map(|(re, bounds)| {
        re.captures(&folded).map(|c| {
            let (start, end) = bounds(&c);
            Period {
                text: normalize(&c[0]),
                start,
                end,
            }
        })
    })
}

/// Remove the period expression from a funding description.
pub fn strip_period(text: &str, period: &Period) -> String {
    if period.is_empty() {
        return normalize(text);
    }
    let folded = normalize(&fold_width(text));
    normalize(&folded.replace(&period.text, " "))
}

// ── Money ──

static BUDGET_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:予算|助成金額|補助金額|配分額)[：:]\s*([^、\n]+)").unwrap()
});
static BUDGET_AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9][0-9,]*\s*(?:万円|千円|円|ドル|ユーロ))").unwrap()
});

pub fn extract_budget(text: &str) -> Option<String> {
    let folded = fold_width(text);
    BUDGET_LABEL_RE
        .captures(&folded)
        .or_else(|| BUDGET_AMOUNT_RE.captures(&folded))
        .map(|c| normalize(&c[1]))
}
