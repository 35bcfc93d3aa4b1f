use serde::{Deserialize, Serialize};

use super::field::{Field, FieldSpec, Read};
use super::locator::Locator;
use crate::error::SpecError;

// ── Field names ──

pub const NAME: &str = "name";
pub const ENGLISH_NAME: &str = "english_name";
pub const AFFILIATIONS: &str = "affiliations";
pub const POSITION: &str = "position";
pub const KEYWORDS: &str = "keywords";
pub const AREAS: &str = "areas";
pub const ORCID: &str = "orcid_id";
pub const JGLOBAL: &str = "jglobal_id";
pub const MEMBER_ID: &str = "member_id";
pub const EDUCATION: &str = "education";

pub const TITLE: &str = "title";
pub const FUNDING: &str = "funding";
pub const RESEARCHERS: &str = "researchers";

/// One entry per project on the `research_projects` page.
pub const PROJECT_ITEM: &str = "li.list-group-item";

const LIST_TITLE: &str = "a.rm-cv-list-title";

/// Named extraction profile.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Basic,
    Enhanced,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Basic => "basic",
            Mode::Enhanced => "enhanced",
        }
    }
}

// ── Profile page ──

fn name() -> FieldSpec {
    FieldSpec::new(NAME)
        .then(
            Locator::Pattern {
                selector: "title",
                pattern: r"^\s*([^(（|]+?)\s*(?:[(（|]|\s-\s|$)",
            },
            Read::Text,
        )
        .then(
            Locator::Css(r#"h1[class*="name"], h2[class*="name"], h3[class*="name"]"#),
            Read::Text,
        )
}

fn english_name() -> FieldSpec {
    FieldSpec::new(ENGLISH_NAME).then(
        Locator::Pattern {
            selector: "title",
            pattern: r"[(（]\s*([^)）]+?)\s*[)）]",
        },
        Read::Text,
    )
}

fn affiliations() -> FieldSpec {
    FieldSpec::new(AFFILIATIONS)
        .then(
            Locator::Term {
                list: "div#profile dl",
                term: "所属",
                item: None,
            },
            Read::Text,
        )
        .then(
            Locator::Term {
                list: "dl.rm-cv-basic-dl",
                term: "所属",
                item: None,
            },
            Read::Text,
        )
}

fn position() -> FieldSpec {
    FieldSpec::new(POSITION)
        .then(
            Locator::Term {
                list: "div#profile dl",
                term: "職名",
                item: None,
            },
            Read::Text,
        )
        .then(
            Locator::Term {
                list: "dl.rm-cv-basic-dl",
                term: "職名",
                item: None,
            },
            Read::Text,
        )
        .then(Locator::Css("div.rm-cv-card-name-section"), Read::Text)
}

/// Heading/list, panel/body, then bare body items: the three layouts
/// profile sections have shipped with.
fn section_list(
    field: &'static str,
    heading: &'static str,
    list: &'static str,
    panel: &'static str,
    body: &'static str,
    bare: &'static str,
) -> FieldSpec {
    FieldSpec::new(field)
        .then(
            Locator::Heading {
                heading: "h2",
                text: heading,
                container: list,
                item: LIST_TITLE,
            },
            Read::Text,
        )
        .then(
            Locator::Panel {
                id: panel,
                body,
                item: LIST_TITLE,
            },
            Read::Text,
        )
        .then(Locator::Css(bare), Read::Text)
}

fn keywords() -> FieldSpec {
    section_list(
        KEYWORDS,
        "研究キーワード",
        "ul.rm-cv-research-interests",
        "research_interests",
        "div.research_interests-body",
        "div.research_interests-body li.rm-cv-disclosed a.rm-cv-list-title",
    )
}

fn areas() -> FieldSpec {
    section_list(
        AREAS,
        "研究分野",
        "ul.rm-cv-research-areas",
        "research_areas",
        "div.research_areas-body",
        "div.research_areas-body li.rm-cv-disclosed a.rm-cv-list-title",
    )
}

fn external_id(field: &'static str, term: &'static str, item: Option<&'static str>) -> FieldSpec {
    FieldSpec::new(field).then(
        Locator::Term {
            list: "dl",
            term,
            item,
        },
        Read::Text,
    )
}

fn education() -> FieldSpec {
    FieldSpec::new(EDUCATION)
        .then(
            Locator::Css(
                "div.education-body li.list-group-item.rm-cv-disclosed div.rm-cv-list-content div.row",
            ),
            Read::Text,
        )
        .then(
            Locator::Panel {
                id: "education",
                body: "div.education-body",
                item: "li.rm-cv-disclosed",
            },
            Read::Text,
        )
}

// ── Project fragment ──

fn title() -> FieldSpec {
    FieldSpec::new(TITLE).then(Locator::Css(LIST_TITLE), Read::Text)
}

fn funding() -> FieldSpec {
    FieldSpec::new(FUNDING).then(
        Locator::Without {
            selector: "div:not(.rm-cv-list-author)",
            exclude: "a",
        },
        Read::Text,
    )
}

fn researchers() -> FieldSpec {
    FieldSpec::new(RESEARCHERS).then(Locator::Css("div.rm-cv-list-author"), Read::Text)
}

/// Field specs a mode applies to the profile page.
pub fn profile_specs(mode: Mode) -> Vec<FieldSpec> {
    let mut specs = vec![name(), english_name(), affiliations(), position(), keywords(), areas()];
    if mode == Mode::Enhanced {
        specs.extend([
            external_id(ORCID, "ORCID iD", Some("a"))
                .then(Locator::Css("a[href*='orcid.org/']"), Read::Attr("href")),
            external_id(JGLOBAL, "J-GLOBAL ID", Some("a")),
            external_id(MEMBER_ID, "researchmap会員ID", None),
            education(),
        ]);
    }
    specs
}

/// Field specs applied to each project-list entry.
pub fn project_specs() -> Vec<FieldSpec> {
    vec![title(), funding(), researchers()]
}

// ── Catalog ──

pub struct ModeFields {
    pub mode: Mode,
    pub profile: Vec<Field>,
    /// Budget and funding analysis on projects.
    pub project_details: bool,
}

/// Every field needed for a run, compiled once before the first fetch.
pub struct Catalog {
    pub modes: Vec<ModeFields>,
    pub project: Vec<Field>,
    pub project_item: scraper::Selector,
}

impl Catalog {
    pub fn compile(modes: &[Mode], base: &str) -> Result<Self, SpecError> {
        let modes = modes
            .iter()
            .map(|&mode| {
                let profile = profile_specs(mode)
                    .iter()
                    .map(|s| s.compile(base))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ModeFields {
                    mode,
                    profile,
                    project_details: mode == Mode::Enhanced,
                })
            })
            .collect::<Result<Vec<_>, SpecError>>()?;
        let project = project_specs()
            .iter()
            .map(|s| s.compile(base))
            .collect::<Result<Vec<_>, _>>()?;
        let project_item = super::locator::selector("project", PROJECT_ITEM)?;
        Ok(Self {
            modes,
            project,
            project_item,
        })
    }
}
