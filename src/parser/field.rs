use std::sync::LazyLock;

use scraper::{ElementRef, Selector};
use serde::Serialize;
use tracing::debug;

use super::locator::{element_text, Compiled, Hit, Locator};
use super::text::{absolutize, last_segment, normalize};
use crate::error::SpecError;
use crate::ocr::ImageRef;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[src]").unwrap());

/// What to read from a matched element.
#[derive(Debug, Clone, Copy)]
pub enum Read {
    /// Element text; link from the element's own `href` or its first anchor.
    Text,
    Attr(&'static str),
}

/// Declarative field: a name plus a fallback chain tried in order.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub chain: Vec<(Locator, Read)>,
}

impl FieldSpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            chain: Vec::new(),
        }
    }

    pub fn then(mut self, locator: Locator, read: Read) -> Self {
        self.chain.push((locator, read));
        self
    }

    /// Validate every selector and pattern. Links are resolved against `base`.
    pub fn compile(&self, base: &str) -> Result<Field, SpecError> {
        if self.chain.is_empty() {
            return Err(SpecError::EmptyChain(self.name.to_string()));
        }
        let steps = self
            .chain
            .iter()
            .map(|(loc, read)| Ok((loc.compile(self.name)?, *read)))
            .collect::<Result<Vec<_>, SpecError>>()?;
        Ok(Field {
            name: self.name,
            base: base.to_string(),
            steps,
        })
    }
}

/// Compiled field, shareable across threads.
pub struct Field {
    pub name: &'static str,
    base: String,
    steps: Vec<(Compiled, Read)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedValue {
    pub text: String,
    pub link: Option<String>,
    pub id: Option<String>,
    pub image: Option<ImageRef>,
}

/// Run the field's chain against `scope`. The first locator yielding any value
/// wins; a field absent from the page is an empty list.
pub fn extract(scope: ElementRef<'_>, field: &Field) -> Result<Vec<ExtractedValue>, SpecError> {
    if field.steps.is_empty() {
        return Err(SpecError::EmptyChain(field.name.to_string()));
    }

    for (i, (locator, read)) in field.steps.iter().enumerate() {
        let mut values: Vec<ExtractedValue> = Vec::new();
        for hit in locator.resolve(scope) {
            let Some(v) = read_hit(hit, *read, &field.base) else {
                continue;
            };
            let dup = values.iter().any(|seen| {
                if v.text.is_empty() {
                    seen.text.is_empty() && seen.image == v.image
                } else {
                    seen.text == v.text
                }
            });
            if !dup {
                values.push(v);
            }
        }
        if !values.is_empty() {
            debug!("{}: locator {} matched {} value(s)", field.name, i, values.len());
            return Ok(values);
        }
    }

    Ok(Vec::new())
}

fn read_hit(hit: Hit<'_>, read: Read, base: &str) -> Option<ExtractedValue> {
    let (el, text) = match (hit, read) {
        (Hit::Text(el, t), _) => (el, normalize(&t)),
        (Hit::Element(el), Read::Text) => (el, element_text(el)),
        (Hit::Element(el), Read::Attr(name)) => (el, normalize(el.value().attr(name)?)),
    };

    let link = match read {
        Read::Attr("href") if !text.is_empty() => Some(absolutize(base, &text)),
        _ => href_of(el).map(|h| absolutize(base, h)),
    };
    let id = link.as_deref().and_then(last_segment);

    let image = if text.is_empty() {
        image_of(el, base)
    } else {
        None
    };
    if text.is_empty() && image.is_none() {
        return None;
    }

    Some(ExtractedValue {
        text,
        link,
        id,
        image,
    })
}

fn href_of(el: ElementRef<'_>) -> Option<&str> {
    el.value()
        .attr("href")
        .or_else(|| el.select(&ANCHOR).next().and_then(|a| a.value().attr("href")))
        .filter(|h| !h.trim().is_empty())
}

fn image_of(el: ElementRef<'_>, base: &str) -> Option<ImageRef> {
    let img = if el.value().name() == "img" {
        el
    } else {
        el.select(&IMAGE).next()?
    };
    let src = img.value().attr("src")?;
    Some(ImageRef {
        src: absolutize(base, src),
        alt: normalize(img.value().attr("alt").unwrap_or_default()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    const BASE: &str = "https://researchmap.jp";

    fn keyword_spec() -> FieldSpec {
        FieldSpec::new("keywords")
            .then(
                Locator::Heading {
                    heading: "h2",
                    text: "研究キーワード",
                    container: "ul.kw",
                    item: "a",
                },
                Read::Text,
            )
            .then(Locator::Css("div.fallback a"), Read::Text)
    }

    #[test]
    fn primary_match_short_circuits() {
        let doc = Html::parse_document(
            r#"<h2>研究キーワード</h2><ul class="kw"><li><a href="/k/1">A</a></li></ul>
               <div class="fallback"><a>B</a></div>"#,
        );
        let field = keyword_spec().compile(BASE).unwrap();
        let got = extract(doc.root_element(), &field).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text, "A");
        assert_eq!(got[0].link.as_deref(), Some("https://researchmap.jp/k/1"));
        assert_eq!(got[0].id.as_deref(), Some("1"));
    }

    #[test]
    fn falls_back_when_primary_is_empty() {
        let doc = Html::parse_document(
            r#"<h2>研究キーワード</h2><ul class="kw"><li><a> </a></li></ul>
               <div class="fallback"><a>B</a><a>B </a></div>"#,
        );
        let field = keyword_spec().compile(BASE).unwrap();
        let texts: Vec<_> = extract(doc.root_element(), &field)
            .unwrap()
            .into_iter()
            .map(|v| v.text)
            .collect();
        assert_eq!(texts, vec!["B"]);
    }

    #[test]
    fn absent_field_is_empty() {
        let doc = Html::parse_document("<p>nothing</p>");
        let field = keyword_spec().compile(BASE).unwrap();
        assert!(extract(doc.root_element(), &field).unwrap().is_empty());
    }

    #[test]
    fn empty_chain_rejected() {
        let err = FieldSpec::new("areas").compile(BASE).err().unwrap();
        assert!(matches!(err, SpecError::EmptyChain(name) if name == "areas"));
    }

    #[test]
    fn image_only_values_survive() {
        let doc = Html::parse_document(
            r#"<dl><dt>所属</dt><dd><img src="/logo.png" alt="東北大学"></dd></dl>"#,
        );
        let field = FieldSpec::new("affiliations")
            .then(
                Locator::Term {
                    list: "dl",
                    term: "所属",
                    item: None,
                },
                Read::Text,
            )
            .compile(BASE)
            .unwrap();
        let got = extract(doc.root_element(), &field).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text, "");
        let image = got[0].image.as_ref().unwrap();
        assert_eq!(image.src, "https://researchmap.jp/logo.png");
        assert_eq!(image.alt, "東北大学");
    }

    #[test]
    fn attribute_reads() {
        let doc = Html::parse_document(r#"<a class="p" href="/taro">Taro</a><a class="p">x</a>"#);
        let field = FieldSpec::new("url")
            .then(Locator::Css("a.p"), Read::Attr("href"))
            .compile(BASE)
            .unwrap();
        let got = extract(doc.root_element(), &field).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text, "/taro");
        assert_eq!(got[0].link.as_deref(), Some("https://researchmap.jp/taro"));
    }
}
