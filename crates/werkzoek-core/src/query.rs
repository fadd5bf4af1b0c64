use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::cache::{QueryCache, QueryKind};
use crate::error::ApiError;
use crate::gateway::{Gateway, decode};
use crate::models::{
    DEFAULT_SIMILAR_LIMIT, JobDomain, Language, VacancyDetails, VacancySearchParams,
    VacancySearchResponse,
};
use crate::request::{RequestDescriptor, encode_segment};
use crate::traits::{CredentialStore, Transport, VacancySearch};

pub const VACANCIES_PATH: &str = "/vacatures";
pub const JOB_DOMAINS_PATH: &str = "/jobdomeinen";

/// Typed vacancy and job-domain operations over a [`Gateway`].
///
/// Required identifiers are checked before anything is queued, so a bad call
/// never costs a rate-limit slot.
pub struct VacancyClient<T, C> {
    gateway: Gateway<T, C>,
    cache: Option<QueryCache>,
}

impl<T, C> Clone for VacancyClient<T, C> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<T: Transport, C: CredentialStore> VacancyClient<T, C> {
    pub fn new(gateway: Gateway<T, C>) -> Self {
        Self {
            gateway,
            cache: None,
        }
    }

    /// Serve repeated GETs from `cache` until their TTL runs out.
    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn gateway(&self) -> &Gateway<T, C> {
        &self.gateway
    }

    /// `GET /vacatures` for one page of results.
    pub async fn search_vacancies(
        &self,
        params: &VacancySearchParams,
    ) -> Result<VacancySearchResponse, ApiError> {
        tracing::debug!(page = params.page(), limit = params.limit(), "Searching vacancies");
        self.fetch(QueryKind::Search, search_descriptor(params)).await
    }

    /// `GET /vacatures/{id}`.
    pub async fn get_vacancy_by_id(
        &self,
        id: &str,
        lang: Option<Language>,
    ) -> Result<VacancyDetails, ApiError> {
        let id = require_id("id", id, "Vacancy ID is required")?;
        let descriptor = RequestDescriptor::get(format!(
            "{VACANCIES_PATH}/{}",
            encode_segment(id)
        ))
        .query("lang", lang.unwrap_or_default().as_str());
        self.fetch(QueryKind::Detail, descriptor).await
    }

    /// `GET /vacatures/{id}/similar`, five results unless `limit` says otherwise.
    pub async fn get_similar_vacancies(
        &self,
        id: &str,
        limit: Option<u32>,
    ) -> Result<VacancySearchResponse, ApiError> {
        let id = require_id("id", id, "Vacancy ID is required")?;
        let descriptor = RequestDescriptor::get(format!(
            "{VACANCIES_PATH}/{}/similar",
            encode_segment(id)
        ))
        .query("limit", limit.unwrap_or(DEFAULT_SIMILAR_LIMIT));
        self.fetch(QueryKind::Similar, descriptor).await
    }

    pub async fn get_job_domains(&self, lang: Option<Language>) -> Result<Vec<JobDomain>, ApiError> {
        let descriptor = RequestDescriptor::get(JOB_DOMAINS_PATH)
            .query("lang", lang.unwrap_or_default().as_str());
        self.fetch(QueryKind::JobDomains, descriptor).await
    }

    pub async fn get_job_domain_by_id(
        &self,
        id: &str,
        lang: Option<Language>,
    ) -> Result<JobDomain, ApiError> {
        let id = require_id("id", id, "Job domain ID is required")?;
        let descriptor = RequestDescriptor::get(format!(
            "{JOB_DOMAINS_PATH}/{}",
            encode_segment(id)
        ))
        .query("lang", lang.unwrap_or_default().as_str());
        self.fetch(QueryKind::JobDomains, descriptor).await
    }

    pub async fn get_child_job_domains(
        &self,
        parent_id: &str,
        lang: Option<Language>,
    ) -> Result<Vec<JobDomain>, ApiError> {
        let parent_id = require_id("parentId", parent_id, "Parent job domain ID is required")?;
        let descriptor = RequestDescriptor::get(format!(
            "{JOB_DOMAINS_PATH}/{}/children",
            encode_segment(parent_id)
        ))
        .query("lang", lang.unwrap_or_default().as_str());
        self.fetch(QueryKind::JobDomains, descriptor).await
    }

    /// Forget the cached page for `params`, if any.
    pub async fn evict_search(&self, params: &VacancySearchParams) {
        if let Some(cache) = &self.cache {
            cache
                .invalidate(QueryKind::Search, &search_descriptor(params).cache_key())
                .await;
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    async fn fetch<R: DeserializeOwned>(
        &self,
        kind: QueryKind,
        descriptor: RequestDescriptor,
    ) -> Result<R, ApiError> {
        let Some(cache) = &self.cache else {
            return self.gateway.enqueue(descriptor).await;
        };

        let key = descriptor.cache_key();
        if let Some(body) = cache.get(kind, &key).await {
            return decode(&body);
        }

        let response = self.gateway.enqueue_raw(descriptor).await?;
        let value = decode(&response.body)?;
        cache.insert(kind, key, Arc::from(response.body)).await;
        Ok(value)
    }
}

impl<T: Transport, C: CredentialStore> VacancySearch for VacancyClient<T, C> {
    async fn search(
        &self,
        params: &VacancySearchParams,
    ) -> Result<VacancySearchResponse, ApiError> {
        self.search_vacancies(params).await
    }

    async fn evict(&self, params: &VacancySearchParams) {
        self.evict_search(params).await;
    }
}

/// Build the `GET /vacatures` descriptor: `offset = (page - 1) * limit`,
/// defaults applied, absent filters omitted.
pub fn search_descriptor(params: &VacancySearchParams) -> RequestDescriptor {
    RequestDescriptor::get(VACANCIES_PATH)
        .query_opt("q", params.q.as_deref())
        .query_opt("jobDomainId", params.job_domain_id.as_deref())
        .query_opt("postalCode", params.postal_code.as_deref())
        .query_opt("distance", params.distance)
        .query("offset", params.offset())
        .query("limit", params.limit())
        .query("sort", params.sort.as_str())
        .query("lang", params.lang.as_str())
}

fn require_id<'a>(
    field: &'static str,
    value: &'a str,
    message: &str,
) -> Result<&'a str, ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(field, message));
    }
    Ok(value)
}
