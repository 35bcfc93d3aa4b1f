use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::info;

use crate::error::FetchError;
use crate::loader::DocumentLoader;
use crate::model::ResearcherRecord;
use crate::parser::locator::element_text;
use crate::parser::text::{absolutize, last_segment};

pub const PER_PAGE: usize = 60;

static CARD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li > div.rm-cv-card-outer").unwrap());
static CARD_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.rm-cv-card-name a[href]").unwrap());
static CARD_NAME_EN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.rm-cv-card-name-en").unwrap());
static CARD_AFFILIATION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.rm-cv-card-name-affiliation").unwrap());
static CARD_SECTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.rm-cv-card-name-section").unwrap());
static CARD_KANA: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.rm-cv-card-kana").unwrap());
static PAGINATION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.pagination li a").unwrap());
static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"総件数\s*[:：]?\s*([\d,]+)").unwrap());

/// One researcher as listed on a search result page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchCard {
    pub identifier: String,
    pub url: String,
    pub name: String,
    pub english_name: String,
    pub kana_name: String,
    pub affiliation: String,
    pub position: String,
}

impl SearchCard {
    /// Partial record merged into the researcher's profile record.
    pub fn seed(&self) -> ResearcherRecord {
        let mut r = ResearcherRecord::new(&self.identifier, &self.url);
        r.name = self.name.clone();
        r.english_name = self.english_name.clone();
        r.kana_name = self.kana_name.clone();
        r.position = self.position.clone();
        if !self.affiliation.is_empty() {
            r.affiliations.push(self.affiliation.clone());
        }
        r
    }
}

fn child_text(card: ElementRef<'_>, sel: &Selector) -> String {
    card.select(sel).next().map(element_text).unwrap_or_default()
}

/// Researcher cards on one search page, in page order.
pub fn parse_cards(html: &str, base: &str) -> Vec<SearchCard> {
    let doc = Html::parse_document(html);
    doc.select(&CARD)
        .filter_map(|card| {
            let link = card.select(&CARD_NAME).next()?;
            let url = absolutize(base, link.value().attr("href")?);
            let identifier = last_segment(&url)?;
            Some(SearchCard {
                identifier,
                url,
                name: element_text(link),
                english_name: child_text(card, &CARD_NAME_EN),
                kana_name: child_text(card, &CARD_KANA),
                affiliation: child_text(card, &CARD_AFFILIATION),
                position: child_text(card, &CARD_SECTION),
            })
        })
        .collect()
}

/// Page count from the `総件数` counter, else the highest pagination link.
pub fn total_pages(html: &str) -> usize {
    if let Some(c) = TOTAL_RE.captures(html) {
        if let Ok(total) = c[1].replace(',', "").parse::<usize>() {
            return total.div_ceil(PER_PAGE).max(1);
        }
    }
    let doc = Html::parse_document(html);
    doc.select(&PAGINATION)
        .filter_map(|a| element_text(a).parse::<usize>().ok())
        .max()
        .unwrap_or(1)
}

pub fn page_url(search_url: &str, page: usize) -> String {
    if page <= 1 {
        return search_url.to_string();
    }
    let sep = if search_url.contains('?') { '&' } else { '?' };
    format!("{}{}start={}", search_url, sep, (page - 1) * PER_PAGE + 1)
}

fn extend_unique(cards: &mut Vec<SearchCard>, found: Vec<SearchCard>) {
    for card in found {
        if !cards.iter().any(|c| c.identifier == card.identifier) {
            cards.push(card);
        }
    }
}

/// Walk every result page and return unique cards in listing order,
/// stopping once `limit` cards are collected.
pub async fn collect(
    loader: &dyn DocumentLoader,
    search_url: &str,
    base: &str,
    limit: Option<usize>,
) -> Result<Vec<SearchCard>, FetchError> {
    info!("Fetching search results: {}", search_url);
    let first = loader.fetch(search_url).await?;
    let pages = total_pages(&first.body);
    info!("{} result page(s)", pages);

    let mut cards: Vec<SearchCard> = Vec::new();
    extend_unique(&mut cards, parse_cards(&first.body, base));

    for page in 2..=pages {
        if limit.is_some_and(|n| cards.len() >= n) {
            break;
        }
        let body = loader.fetch(&page_url(search_url, page)).await?.body;
        let found = parse_cards(&body, base);
        info!("Page {}/{}: {} researcher(s)", page, pages, found.len());
        extend_unique(&mut cards, found);
    }

    if let Some(n) = limit {
        cards.truncate(n);
    }
    info!("Collected {} researchers", cards.len());
    Ok(cards)
}
