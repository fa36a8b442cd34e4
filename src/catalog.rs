//! Client for the curation REST API, the authority on which studies may be
//! public.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::SyncError;

pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Both listings return raw accession strings; callers validate them.
pub trait CatalogClient {
    /// Published studies with a full p-value set.
    fn list_published_accessions(&self) -> Result<Vec<String>, SyncError>;
    /// Studies not yet in a journal but cleared for summary statistics release.
    fn list_embargoed_releasable_accessions(&self) -> Result<Vec<String>, SyncError>;
}

impl<C: CatalogClient + ?Sized> CatalogClient for &C {
    fn list_published_accessions(&self) -> Result<Vec<String>, SyncError> {
        (**self).list_published_accessions()
    }

    fn list_embargoed_releasable_accessions(&self) -> Result<Vec<String>, SyncError> {
        (**self).list_embargoed_releasable_accessions()
    }
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "totalPages", default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
pub struct PublishedPage {
    #[serde(rename = "_embedded", default)]
    embedded: PublishedEmbedded,
    page: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PublishedEmbedded {
    #[serde(default)]
    studies: Vec<PublishedStudy>,
}

#[derive(Debug, Deserialize)]
struct PublishedStudy {
    accession_id: Option<String>,
    #[serde(default)]
    full_pvalue_set: bool,
    #[serde(default)]
    housekeeping: Option<Housekeeping>,
}

#[derive(Debug, Deserialize)]
struct Housekeeping {
    #[serde(default)]
    is_published: bool,
}

#[derive(Debug, Deserialize)]
pub struct UnpublishedPage {
    #[serde(rename = "_embedded", default)]
    embedded: UnpublishedEmbedded,
    page: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct UnpublishedEmbedded {
    #[serde(rename = "unpublishedStudies", default)]
    unpublished_studies: Vec<UnpublishedStudy>,
}

#[derive(Debug, Deserialize)]
struct UnpublishedStudy {
    study_accession: Option<String>,
}

trait CatalogPage: DeserializeOwned {
    fn total_pages(&self) -> u32;
    fn into_accessions(self) -> Vec<String>;
}

impl CatalogPage for PublishedPage {
    fn total_pages(&self) -> u32 {
        self.page.total_pages
    }

    fn into_accessions(self) -> Vec<String> {
        self.embedded
            .studies
            .into_iter()
            .filter(|study| {
                study.full_pvalue_set
                    && study
                        .housekeeping
                        .as_ref()
                        .map(|hk| hk.is_published)
                        .unwrap_or(false)
            })
            .filter_map(|study| study.accession_id)
            .collect()
    }
}

impl CatalogPage for UnpublishedPage {
    fn total_pages(&self) -> u32 {
        self.page.total_pages
    }

    fn into_accessions(self) -> Vec<String> {
        self.embedded
            .unpublished_studies
            .into_iter()
            .filter_map(|study| study.study_accession)
            .collect()
    }
}

/// Accessions and total page count of one `published-studies` page.
pub fn parse_published_page(body: &str) -> Result<(Vec<String>, u32), SyncError> {
    parse_page::<PublishedPage>(body)
}

/// Accessions and total page count of one `unpublished-studies` page.
pub fn parse_unpublished_page(body: &str) -> Result<(Vec<String>, u32), SyncError> {
    parse_page::<UnpublishedPage>(body)
}

fn parse_page<P: CatalogPage>(body: &str) -> Result<(Vec<String>, u32), SyncError> {
    let page: P =
        serde_json::from_str(body).map_err(|err| SyncError::CatalogPayload(err.to_string()))?;
    let total = page.total_pages();
    Ok((page.into_accessions(), total))
}

/// Requests pages from 0 until the reported `totalPages`; any failing page
/// aborts the listing.
fn collect_pages<P: CatalogPage>(
    mut fetch: impl FnMut(u32) -> Result<String, SyncError>,
) -> Result<Vec<String>, SyncError> {
    let mut accessions = Vec::new();
    let mut page = 0u32;
    loop {
        let (items, total_pages) = parse_page::<P>(&fetch(page)?)?;
        accessions.extend(items);
        page += 1;
        if page >= total_pages {
            break;
        }
    }
    Ok(accessions)
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl CatalogHttpClient {
    pub fn new(base_url: &str, page_size: u32) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sumstats-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::CatalogHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        })
    }

    pub fn endpoint(&self, resource: &str) -> String {
        format!("{}/{resource}", self.base_url)
    }

    fn fetch_all<P: CatalogPage>(&self, resource: &str) -> Result<Vec<String>, SyncError> {
        let url = self.endpoint(resource);
        collect_pages::<P>(|page| {
            tracing::debug!(%url, page, "fetching catalog page");
            self.fetch_page(&url, page)
        })
    }

    fn fetch_page(&self, url: &str, page: u32) -> Result<String, SyncError> {
        let size = self.page_size.to_string();
        let page = page.to_string();
        let response = self.send_with_retries(|| {
            self.client
                .get(url)
                .query(&[("size", size.as_str()), ("page", page.as_str())])
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(SyncError::CatalogStatus { status, message });
        }
        response
            .text()
            .map_err(|err| SyncError::CatalogHttp(err.to_string()))
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, SyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::CatalogHttp(err.to_string()));
                }
            }
        }
    }
}

impl CatalogClient for CatalogHttpClient {
    fn list_published_accessions(&self) -> Result<Vec<String>, SyncError> {
        self.fetch_all::<PublishedPage>("published-studies")
    }

    fn list_embargoed_releasable_accessions(&self) -> Result<Vec<String>, SyncError> {
        self.fetch_all::<UnpublishedPage>("unpublished-studies")
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
