use regex::Regex;
use scraper::{ElementRef, Selector};

use crate::error::SpecError;

/// Where a field lives in a page. One variant per layout shape seen in the wild;
/// new layouts are added by appending a locator to a field's chain.
#[derive(Debug, Clone)]
pub enum Locator {
    /// Every element matching the selector.
    Css(&'static str),
    /// Heading with exact text, then the first `container` after it, then its `item`s.
    Heading {
        heading: &'static str,
        text: &'static str,
        container: &'static str,
        item: &'static str,
    },
    /// Element with `id`, then the first `body` after it, then its `item`s.
    Panel {
        id: &'static str,
        body: &'static str,
        item: &'static str,
    },
    /// `<dt>` with exact text inside each `list`; yields the following `<dd>`s,
    /// continuing across empty `<dt>` rows.
    Term {
        list: &'static str,
        term: &'static str,
        item: Option<&'static str>,
    },
    /// Elements whose text matches `pattern`; capture group 1 is the value.
    Pattern {
        selector: &'static str,
        pattern: &'static str,
    },
    /// Elements matching `selector` with no descendant matching `exclude`.
    Without {
        selector: &'static str,
        exclude: &'static str,
    },
}

/// A matched element, or a piece of text cut out of one.
pub enum Hit<'a> {
    Element(ElementRef<'a>),
    Text(ElementRef<'a>, String),
}

pub(crate) enum Compiled {
    Css(Selector),
    Heading {
        heading: Selector,
        text: String,
        container: Selector,
        item: Selector,
    },
    Panel {
        id: String,
        body: Selector,
        item: Selector,
    },
    Term {
        list: Selector,
        term: String,
        item: Option<Selector>,
    },
    Pattern {
        selector: Selector,
        pattern: Regex,
    },
    Without {
        selector: Selector,
        exclude: Selector,
    },
}

pub(crate) fn selector(field: &str, css: &str) -> Result<Selector, SpecError> {
    Selector::parse(css).map_err(|e| SpecError::Selector {
        field: field.to_string(),
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

impl Locator {
    pub(crate) fn compile(&self, field: &str) -> Result<Compiled, SpecError> {
        let sel = |css: &str| selector(field, css);
        Ok(match self {
            Locator::Css(css) => Compiled::Css(sel(*css)?),
            Locator::Heading {
                heading,
                text,
                container,
                item,
            } => Compiled::Heading {
                heading: sel(*heading)?,
                text: text.to_string(),
                container: sel(*container)?,
                item: sel(*item)?,
            },
            Locator::Panel { id, body, item } => Compiled::Panel {
                id: id.to_string(),
                body: sel(*body)?,
                item: sel(*item)?,
            },
            Locator::Term { list, term, item } => Compiled::Term {
                list: sel(*list)?,
                term: term.to_string(),
                item: item.map(sel).transpose()?,
            },
            Locator::Pattern { selector, pattern } => Compiled::Pattern {
                selector: sel(*selector)?,
                pattern: Regex::new(pattern).map_err(|source| SpecError::Pattern {
                    field: field.to_string(),
                    pattern: pattern.to_string(),
                    source,
                })?,
            },
            Locator::Without { selector, exclude } => Compiled::Without {
                selector: sel(*selector)?,
                exclude: sel(*exclude)?,
            },
        })
    }
}

impl Compiled {
    pub(crate) fn resolve<'a>(&self, scope: ElementRef<'a>) -> Vec<Hit<'a>> {
        match self {
            Compiled::Css(sel) => scope.select(sel).map(Hit::Element).collect(),

            Compiled::Heading {
                heading,
                text,
                container,
                item,
            } => scope
                .select(heading)
                .find(|h| element_text(*h) == *text)
                .and_then(|h| first_after(scope, h, container))
                .map(|c| c.select(item).map(Hit::Element).collect())
                .unwrap_or_default(),

            Compiled::Panel { id, body, item } => scope
                .descendants()
                .filter_map(ElementRef::wrap)
                .find(|e| e.value().id() == Some(id.as_str()))
                .and_then(|panel| first_after(scope, panel, body))
                .map(|b| b.select(item).map(Hit::Element).collect())
                .unwrap_or_default(),

            Compiled::Term { list, term, item } => {
                let mut hits = Vec::new();
                for dl in scope.select(list) {
                    for dd in term_values(dl, term) {
                        match item {
                            Some(sel) => hits.extend(dd.select(sel).map(Hit::Element)),
                            None => hits.push(Hit::Element(dd)),
                        }
                    }
                }
                hits
            }

            Compiled::Pattern { selector, pattern } => scope
                .select(selector)
                .filter_map(|e| {
                    let text = element_text(e);
                    let caps = pattern.captures(&text)?;
                    let value = caps.get(1).or_else(|| caps.get(0))?.as_str().to_string();
                    Some(Hit::Text(e, value))
                })
                .collect(),

            Compiled::Without { selector, exclude } => scope
                .select(selector)
                .filter(|e| e.select(exclude).next().is_none())
                .map(Hit::Element)
                .collect(),
        }
    }
}

/// Whitespace-normalized text content of an element.
pub fn element_text(el: ElementRef<'_>) -> String {
    super::text::normalize(&el.text().collect::<Vec<_>>().join(" "))
}

/// First element matching `sel` that follows `anchor` in document order.
fn first_after<'a>(
    scope: ElementRef<'a>,
    anchor: ElementRef<'a>,
    sel: &Selector,
) -> Option<ElementRef<'a>> {
    scope
        .descendants()
        .skip_while(|n| n.id() != anchor.id())
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find(|e| sel.matches(e))
}

/// `<dd>` values belonging to the `<dt>` labelled `term`.
fn term_values<'a>(dl: ElementRef<'a>, term: &str) -> Vec<ElementRef<'a>> {
    let children: Vec<ElementRef<'a>> = dl.children().filter_map(ElementRef::wrap).collect();
    let Some(start) = children
        .iter()
        .position(|e| e.value().name() == "dt" && element_text(*e) == term)
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for el in &children[start + 1..] {
        match el.value().name() {
            "dd" => out.push(*el),
            "dt" if element_text(*el).is_empty() => continue,
            _ => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn texts(html: &str, loc: Locator) -> Vec<String> {
        let doc = Html::parse_document(html);
        let compiled = loc.compile("test").unwrap();
        compiled
            .resolve(doc.root_element())
            .into_iter()
            .map(|h| match h {
                Hit::Element(e) => element_text(e),
                Hit::Text(_, t) => t,
            })
            .collect()
    }

    #[test]
    fn heading_reads_following_container() {
        let html = r#"
            <h2>研究分野</h2><ul class="areas"><li><a class="t">A</a></li></ul>
            <h2>研究キーワード</h2>
            <div><ul class="kw"><li><a class="t">X</a></li><li><a class="t">Y</a></li></ul></div>
            <ul class="kw"><li><a class="t">Z</a></li></ul>"#;
        let loc = Locator::Heading {
            heading: "h2",
            text: "研究キーワード",
            container: "ul.kw",
            item: "a.t",
        };
        assert_eq!(texts(html, loc), vec!["X", "Y"]);
    }

    #[test]
    fn heading_text_must_match_exactly() {
        let html = r#"<h2>研究キーワード一覧</h2><ul class="kw"><li><a class="t">X</a></li></ul>"#;
        let loc = Locator::Heading {
            heading: "h2",
            text: "研究キーワード",
            container: "ul.kw",
            item: "a.t",
        };
        assert!(texts(html, loc).is_empty());
    }

    #[test]
    fn panel_by_id() {
        let html = r#"
            <div class="research_areas-body"><a class="t">wrong</a></div>
            <div id="research_areas"></div>
            <div class="research_areas-body"><a class="t">right</a></div>"#;
        let loc = Locator::Panel {
            id: "research_areas",
            body: "div.research_areas-body",
            item: "a.t",
        };
        assert_eq!(texts(html, loc), vec!["right"]);
    }

    #[test]
    fn term_follows_empty_dt_rows() {
        let html = r#"<dl class="b">
            <dt>所属</dt><dd>東京大学</dd>
            <dt></dt><dd>理化学研究所</dd>
            <dt>学位</dt><dd>博士(工学)</dd>
        </dl>"#;
        let loc = Locator::Term {
            list: "dl.b",
            term: "所属",
            item: None,
        };
        assert_eq!(texts(html, loc), vec!["東京大学", "理化学研究所"]);
    }

    #[test]
    fn term_narrowed_to_item() {
        let html = r#"<dl><dt>ORCID iD</dt><dd><a href="https://orcid.org/0000-0001">0000-0001</a> <span>x</span></dd></dl>"#;
        let loc = Locator::Term {
            list: "dl",
            term: "ORCID iD",
            item: Some("a"),
        };
        assert_eq!(texts(html, loc), vec!["0000-0001"]);
    }

    #[test]
    fn pattern_capture() {
        let html = "<title>山田 太郎 (Taro Yamada) - researchmap</title>";
        let loc = Locator::Pattern {
            selector: "title",
            pattern: r"^([^(（|-]+?)\s*[(（]",
        };
        assert_eq!(texts(html, loc), vec!["山田 太郎"]);
    }

    #[test]
    fn without_excludes_anchored_divs() {
        let html = r#"<li><div><a>title</a></div><div>funding</div><div class="author">names</div></li>"#;
        let loc = Locator::Without {
            selector: "div:not(.author)",
            exclude: "a",
        };
        assert_eq!(texts(html, loc), vec!["funding"]);
    }

    #[test]
    fn bad_selector_is_spec_error() {
        let err = Locator::Css("ul[").compile("keywords").err().unwrap();
        assert!(matches!(err, SpecError::Selector { .. }));
        let err = Locator::Pattern {
            selector: "p",
            pattern: "(",
        }
        .compile("period")
        .err()
        .unwrap();
        assert!(matches!(err, SpecError::Pattern { .. }));
    }
}
