use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::CatalogConfig;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const STREAM_LINK_TIMEOUT: Duration = Duration::from_secs(10);
const SEARCH_LIMIT: u32 = 20;

const SEARCH_QUERY: &str = r#"
query ($search: SearchInput, $limit: Int, $page: Int, $translationType: VaildTranslationTypeEnumType, $countryOrigin: VaildCountryOriginEnumType) {
  shows(search: $search, limit: $limit, page: $page, translationType: $translationType, countryOrigin: $countryOrigin) {
    edges {
      _id
      name
      englishName
      nativeName
      trustedAltNames
      availableEpisodesDetail
      season
      airedStart
      airedEnd
      aniListId
    }
  }
}"#;

const EPISODE_QUERY: &str = r#"
query ($showId: String!, $translationType: VaildTranslationTypeEnumType!, $episodeString: String!) {
  episode(showId: $showId, translationType: $translationType, episodeString: $episodeString) {
    episodeString
    sourceUrls
  }
}"#;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("catalog returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("catalog query failed: {0}")]
    GraphQl(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid catalog url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl CatalogError {
    /// True when the catalog could not be reached at all, as opposed to
    /// answering with something we can't use.
    pub fn is_transport(&self) -> bool {
        match self {
            CatalogError::Request(e) => !e.is_decode() && !e.is_status(),
            _ => false,
        }
    }
}

/// Subtitled or dubbed episode lists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationType {
    #[default]
    Sub,
    Dub,
}

impl TranslationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationType::Sub => "sub",
            TranslationType::Dub => "dub",
        }
    }
}

impl fmt::Display for TranslationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranslationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sub" => Ok(TranslationType::Sub),
            "dub" => Ok(TranslationType::Dub),
            _ => Err(()),
        }
    }
}

/// Null and missing both become the default value
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Episode labels are usually strings but some entries carry bare numbers
fn episode_labels<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub struct AiredDate {
    #[serde(default, deserialize_with = "null_default")]
    pub year: i32,
    #[serde(default, deserialize_with = "null_default")]
    pub month: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub date: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub hour: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub minute: u32,
}

impl AiredDate {
    pub fn is_known(&self) -> bool {
        self.year > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Season {
    #[serde(default, deserialize_with = "null_default")]
    pub quarter: String,
    #[serde(default, deserialize_with = "null_default")]
    pub year: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailableEpisodes {
    #[serde(default, deserialize_with = "episode_labels")]
    pub sub: Vec<String>,
    #[serde(default, deserialize_with = "episode_labels")]
    pub dub: Vec<String>,
}

/// A show as listed by the catalog. One tracked show may span several entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default)]
    pub english_name: Option<String>,
    #[serde(default)]
    pub native_name: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub trusted_alt_names: Vec<String>,
    #[serde(rename = "aniListId", default)]
    pub ani_list_id: Option<Value>,
    #[serde(default, deserialize_with = "null_default")]
    pub season: Season,
    #[serde(default, deserialize_with = "null_default")]
    pub aired_start: AiredDate,
    #[serde(default, deserialize_with = "null_default")]
    pub aired_end: AiredDate,
    #[serde(rename = "availableEpisodesDetail", default, deserialize_with = "null_default")]
    pub available_episodes: AvailableEpisodes,
}

impl CatalogEntry {
    /// Tracking-service id, or 0 when absent or unparseable
    pub fn external_id(&self) -> u64 {
        match &self.ani_list_id {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::String(s)) if s.is_empty() || s == "null" => 0,
            Some(Value::String(s)) => s.parse().unwrap_or_else(|_| {
                // Happens when the catalog splits a season into halves
                warn!(value = %s, catalog_id = %self.id, name = %self.name, "unparseable external id");
                0
            }),
            _ => 0,
        }
    }

    pub fn episode_labels(&self, translation: TranslationType) -> &[String] {
        match translation {
            TranslationType::Sub => &self.available_episodes.sub,
            TranslationType::Dub => &self.available_episodes.dub,
        }
    }

    /// Primary and alternate names, skipping blanks
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(self.english_name.as_deref())
            .chain(self.native_name.as_deref())
            .filter(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadVariant {
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub download_url: String,
}

/// One playback option for an episode. `source_url` is obfuscated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCandidate {
    pub source_url: String,
    #[serde(default, deserialize_with = "null_default")]
    pub priority: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub source_name: String,
    #[serde(rename = "type", default, deserialize_with = "null_default")]
    pub kind: String,
    #[serde(default)]
    pub downloads: Option<DownloadVariant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamLink {
    pub link: String,
    #[serde(default)]
    pub hls: bool,
}

#[derive(Debug, Deserialize)]
struct StreamLinksResponse {
    #[serde(default, deserialize_with = "null_default")]
    links: Vec<StreamLink>,
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ShowsData {
    shows: ShowEdges,
}

#[derive(Debug, Deserialize)]
struct ShowEdges {
    #[serde(default, deserialize_with = "null_default")]
    edges: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct EpisodeData {
    episode: Option<EpisodeSources>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeSources {
    #[serde(default, deserialize_with = "null_default")]
    source_urls: Vec<SourceCandidate>,
}

/// Thin client over the catalog's GraphQL API and stream-link endpoint
#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    api_url: String,
    stream_host: Url,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        Self::with_base_urls(&config.api_url, &config.stream_host, config.timeout())
    }

    /// Create a client against custom endpoints (for testing)
    pub fn with_base_urls(
        api_url: &str,
        stream_host: &str,
        timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            stream_host: Url::parse(stream_host)?,
        })
    }

    pub fn stream_host(&self) -> &Url {
        &self.stream_host
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, CatalogError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status()));
        }

        let body: GraphQlResponse<T> = response.json().await?;

        if let Some(errors) = body.errors.filter(|e| !e.is_empty()) {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CatalogError::GraphQl(message));
        }

        body.data
            .ok_or_else(|| CatalogError::InvalidResponse("missing data".to_string()))
    }

    /// Search shows by free-text title
    pub async fn search_shows(
        &self,
        query: &str,
        translation: TranslationType,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        debug!(query, %translation, "searching catalog");

        let variables = json!({
            "search": {
                "allowAdult": true,
                "allowUnknown": false,
                "query": query,
            },
            "limit": SEARCH_LIMIT,
            "page": 1,
            "translationType": translation.as_str(),
            "countryOrigin": "ALL",
        });

        let data: ShowsData = self.query(SEARCH_QUERY, variables).await?;
        debug!(query, count = data.shows.edges.len(), "catalog search complete");
        Ok(data.shows.edges)
    }

    /// List the raw playback sources for one episode of a show
    pub async fn episode_sources(
        &self,
        show_id: &str,
        episode: &str,
        translation: TranslationType,
    ) -> Result<Vec<SourceCandidate>, CatalogError> {
        debug!(show_id, episode, %translation, "fetching episode sources");

        let variables = json!({
            "showId": show_id,
            "translationType": translation.as_str(),
            "episodeString": episode,
        });

        let data: EpisodeData = self.query(EPISODE_QUERY, variables).await?;
        Ok(data.episode.map(|e| e.source_urls).unwrap_or_default())
    }

    /// Fetch the link list behind a decoded source URL
    pub async fn fetch_stream_links(&self, url: &Url) -> Result<Vec<StreamLink>, CatalogError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(STREAM_LINK_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status()));
        }

        let body = response.text().await?;
        let parsed: StreamLinksResponse = serde_json::from_str(&body)
            .map_err(|e| CatalogError::InvalidResponse(format!("invalid JSON: {}", e)))?;
        Ok(parsed.links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(json: Value) -> CatalogEntry {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_external_id_variants() {
        assert_eq!(entry(json!({"_id": "a", "aniListId": "21"})).external_id(), 21);
        assert_eq!(entry(json!({"_id": "a", "aniListId": 21})).external_id(), 21);
        assert_eq!(entry(json!({"_id": "a", "aniListId": "null"})).external_id(), 0);
        assert_eq!(entry(json!({"_id": "a", "aniListId": ""})).external_id(), 0);
        assert_eq!(entry(json!({"_id": "a", "aniListId": "21-2"})).external_id(), 0);
        assert_eq!(entry(json!({"_id": "a", "aniListId": null})).external_id(), 0);
        assert_eq!(entry(json!({"_id": "a"})).external_id(), 0);
    }

    #[test]
    fn test_entry_tolerates_nulls() {
        let e = entry(json!({
            "_id": "x1",
            "name": "Show",
            "englishName": null,
            "trustedAltNames": null,
            "season": null,
            "airedStart": {"year": 2023, "month": 4, "date": null},
            "airedEnd": null,
            "availableEpisodesDetail": {"sub": ["1", 2, "3.5"], "dub": null}
        }));

        assert_eq!(e.aired_start.year, 2023);
        assert_eq!(e.aired_start.date, 0);
        assert!(!e.aired_end.is_known());
        assert_eq!(e.episode_labels(TranslationType::Sub), ["1", "2", "3.5"]);
        assert!(e.episode_labels(TranslationType::Dub).is_empty());
        assert_eq!(e.names().collect::<Vec<_>>(), vec!["Show"]);
    }

    #[test]
    fn test_aired_date_ordering() {
        let date = |year, month, date, hour| AiredDate {
            year,
            month,
            date,
            hour,
            minute: 0,
        };
        let a = date(2023, 10, 1, 0);
        let b = date(2024, 1, 5, 0);
        let c = date(2023, 10, 1, 12);
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn test_translation_from_str() {
        assert_eq!("SUB".parse::<TranslationType>(), Ok(TranslationType::Sub));
        assert_eq!(" dub ".parse::<TranslationType>(), Ok(TranslationType::Dub));
        assert_eq!("raw".parse::<TranslationType>(), Err(()));
    }

    #[test]
    fn test_source_candidate_parsing() {
        let c: SourceCandidate = serde_json::from_value(json!({
            "sourceUrl": "--0859",
            "priority": 7.9,
            "sourceName": "S-mp4",
            "type": "player",
            "className": "",
            "downloads": {"sourceName": "S-mp4", "downloadUrl": "https://dl"}
        }))
        .unwrap();

        assert_eq!(c.kind, "player");
        assert_eq!(c.priority, 7.9);
        assert_eq!(c.downloads.unwrap().download_url, "https://dl");
    }
}
