use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const DEFAULT_SIMILAR_LIMIT: u32 = 5;

/// Response language supported by the vacancy API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Nl,
    Fr,
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Nl => "nl",
            Language::Fr => "fr",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nl" => Ok(Language::Nl),
            "fr" => Ok(Language::Fr),
            "en" => Ok(Language::En),
            _ => Err(format!("Unknown language: {s} (expected nl, fr or en)")),
        }
    }
}

/// Result ordering requested from the server. The client never re-sorts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Relevance,
    Date,
    Distance,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Relevance => "relevance",
            SortOrder::Date => "date",
            SortOrder::Distance => "distance",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "relevance" => Ok(SortOrder::Relevance),
            "date" => Ok(SortOrder::Date),
            "distance" => Ok(SortOrder::Distance),
            _ => Err(format!(
                "Unknown sort order: {s} (expected relevance, date or distance)"
            )),
        }
    }
}

/// Search intent for `GET /vacatures`.
///
/// `page` is 1-based. Zero `page`/`limit` values fall back to the defaults
/// when the request is built, see [`VacancySearchParams::page`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VacancySearchParams {
    pub q: Option<String>,
    pub job_domain_id: Option<String>,
    pub postal_code: Option<String>,
    /// Search radius in kilometres around `postal_code`.
    pub distance: Option<u32>,
    pub page: u32,
    pub limit: u32,
    pub sort: SortOrder,
    pub lang: Language,
}

impl Default for VacancySearchParams {
    fn default() -> Self {
        Self {
            q: None,
            job_domain_id: None,
            postal_code: None,
            distance: None,
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort: SortOrder::default(),
            lang: Language::default(),
        }
    }
}

impl VacancySearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn with_job_domain(mut self, id: impl Into<String>) -> Self {
        self.job_domain_id = Some(id.into());
        self
    }

    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = Some(postal_code.into());
        self
    }

    pub fn with_distance(mut self, km: u32) -> Self {
        self.distance = Some(km);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_lang(mut self, lang: Language) -> Self {
        self.lang = lang;
        self
    }

    /// Effective page number (never below 1).
    pub fn page(&self) -> u32 {
        if self.page == 0 { DEFAULT_PAGE } else { self.page }
    }

    /// Effective page size (never zero).
    pub fn limit(&self) -> u32 {
        if self.limit == 0 { DEFAULT_LIMIT } else { self.limit }
    }

    /// Zero-based item offset of the effective page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    /// True if both describe the same query, ignoring the page number.
    pub fn same_query(&self, other: &Self) -> bool {
        self.q == other.q
            && self.job_domain_id == other.job_domain_id
            && self.postal_code == other.postal_code
            && self.distance == other.distance
            && self.limit() == other.limit()
            && self.sort == other.sort
            && self.lang == other.lang
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDomain {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<JobDomain>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub city: String,
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub house_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// One row of a search result page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VacancySearchResult {
    pub id: String,
    pub title: String,
    pub url: String,
    pub company: Company,
    pub publication_date: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_domain_id: Option<String>,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Salary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default)]
    pub benefits: Vec<String>,
}

/// Full vacancy as returned by `GET /vacatures/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VacancyDetails {
    #[serde(flatten)]
    pub summary: VacancySearchResult,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub qualifications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_regime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<Salary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_deadline: Option<String>,
}

/// One page of search results, in server order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VacancySearchResponse {
    pub items: Vec<VacancySearchResult>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub count: u64,
}

impl VacancySearchResponse {
    /// Number of pages the server reports for this query.
    pub fn page_count(&self) -> u64 {
        if self.limit == 0 {
            0
        } else {
            self.total.div_ceil(self.limit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_params_defaults() {
        let params = VacancySearchParams::default();
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 10);
        assert_eq!(params.sort, SortOrder::Relevance);
        assert_eq!(params.lang, Language::Nl);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn test_zero_page_and_limit_fall_back_to_defaults() {
        let params = VacancySearchParams::new().with_page(0).with_limit(0);
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 10);
    }

    #[test]
    fn test_offset_from_page_and_limit() {
        let params = VacancySearchParams::new().with_page(3).with_limit(15);
        assert_eq!(params.offset(), 30);
    }

    #[test]
    fn test_same_query_ignores_page_only() {
        let base = VacancySearchParams::new()
            .with_query("developer")
            .with_postal_code("9000");
        assert!(base.same_query(&base.clone().with_page(4)));
        assert!(!base.same_query(&base.clone().with_postal_code("2000")));
        assert!(!base.same_query(&base.clone().with_sort(SortOrder::Date)));
    }

    #[test]
    fn test_page_count_rounds_up() {
        let response = VacancySearchResponse {
            items: vec![],
            total: 47,
            limit: 15,
            offset: 0,
            count: 15,
        };
        assert_eq!(response.page_count(), 4);
    }

    #[test]
    fn test_page_count_zero_limit() {
        let response = VacancySearchResponse {
            items: vec![],
            total: 47,
            limit: 0,
            offset: 0,
            count: 0,
        };
        assert_eq!(response.page_count(), 0);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("FR".parse::<Language>().unwrap(), Language::Fr);
        assert_eq!("date".parse::<SortOrder>().unwrap(), SortOrder::Date);
        assert!("de".parse::<Language>().is_err());
    }

    #[test]
    fn test_details_flatten_summary_fields() {
        let json = serde_json::json!({
            "id": "v-1",
            "title": "Lasser",
            "url": "https://example.com/v-1",
            "company": { "id": "c-1", "name": "Acme" },
            "publicationDate": "2024-03-01",
            "location": { "city": "Gent", "postalCode": "9000" },
            "expired": false,
            "description": "Welding",
            "contractType": "vast"
        });
        let details: VacancyDetails = serde_json::from_value(json).unwrap();
        assert_eq!(details.summary.id, "v-1");
        assert_eq!(details.summary.location.postal_code, "9000");
        assert_eq!(details.contract_type.as_deref(), Some("vast"));
        assert!(details.requirements.is_empty());
    }
}
