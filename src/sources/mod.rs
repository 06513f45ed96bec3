pub mod cipher;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::catalog::{CatalogClient, CatalogError, SourceCandidate, TranslationType};
use crate::episodes::EpisodeRecord;

pub use cipher::DecodeError;

/// Source providers whose links the player can open directly
pub const SUPPORTED_SOURCES: &[&str] = &["S-mp4", "Luf-mp4"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("no supported source for episode {episode}")]
    NoSupportedSource { episode: u32 },
    #[error("failed to decode source url: {0}")]
    Decode(#[from] DecodeError),
    #[error("source returned no stream links")]
    NoLinks,
    #[error("invalid stream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Keep supported sources, best priority first
pub fn filter_supported(candidates: Vec<SourceCandidate>) -> Vec<SourceCandidate> {
    let mut supported: Vec<SourceCandidate> = candidates
        .into_iter()
        .filter(|c| SUPPORTED_SOURCES.iter().any(|name| c.source_name.contains(name)))
        .collect();
    // Stable sort keeps catalog order among equal priorities
    supported.sort_by(|a, b| b.priority.total_cmp(&a.priority));
    supported
}

/// Turns episodes into playable stream URLs
#[derive(Clone)]
pub struct SourceResolver {
    client: CatalogClient,
    translation: TranslationType,
}

impl SourceResolver {
    pub fn new(client: CatalogClient, translation: TranslationType) -> Self {
        Self {
            client,
            translation,
        }
    }

    /// Supported playback candidates for an episode, highest priority first
    pub async fn get_sources(
        &self,
        episode: &EpisodeRecord,
    ) -> Result<Vec<SourceCandidate>, SourceError> {
        let candidates = self
            .client
            .episode_sources(&episode.show_id, &episode.episode_label, self.translation)
            .await?;

        let total = candidates.len();
        let supported = filter_supported(candidates);

        debug!(
            show_id = %episode.show_id,
            episode = %episode.episode_label,
            overall = episode.overall,
            total,
            supported = supported.len(),
            "episode sources fetched"
        );

        if supported.is_empty() {
            warn!(overall = episode.overall, total, "no supported sources");
            return Err(SourceError::NoSupportedSource {
                episode: episode.overall,
            });
        }

        Ok(supported)
    }

    /// Decode a candidate and fetch the first stream link behind it
    pub async fn get_stream_url(&self, source: &SourceCandidate) -> Result<String, SourceError> {
        let path = cipher::decode(&source.source_url)?;
        let url = self.stream_host_join(&path)?;

        debug!(source = %source.source_name, url = %url, "fetching stream links");

        let links = self.client.fetch_stream_links(&url).await?;
        let link = links
            .into_iter()
            .map(|l| l.link)
            .find(|l| !l.is_empty())
            .ok_or(SourceError::NoLinks)?;

        info!(source = %source.source_name, "stream url resolved");
        Ok(link)
    }

    fn stream_host_join(&self, path: &str) -> Result<Url, SourceError> {
        Ok(self.client.stream_host().join(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, priority: f64) -> SourceCandidate {
        SourceCandidate {
            source_url: "--0859".to_string(),
            priority,
            source_name: name.to_string(),
            kind: "player".to_string(),
            downloads: None,
        }
    }

    #[test]
    fn test_filter_supported_orders_by_priority() {
        let sources = filter_supported(vec![
            candidate("Yt-mp4", 9.0),
            candidate("S-mp4", 7.0),
            candidate("Luf-mp4", 8.0),
        ]);
        let names: Vec<&str> = sources.iter().map(|s| s.source_name.as_str()).collect();
        assert_eq!(names, vec!["Luf-mp4", "S-mp4"]);
    }

    #[test]
    fn test_filter_supported_matches_substring() {
        let sources = filter_supported(vec![candidate("Default S-mp4 (alt)", 1.0)]);
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn test_filter_supported_is_stable_on_ties() {
        let mut first = candidate("S-mp4", 5.0);
        first.source_url = "--09".to_string();
        let sources = filter_supported(vec![first, candidate("Luf-mp4", 5.0)]);
        assert_eq!(sources[0].source_url, "--09");
    }

    #[test]
    fn test_filter_supported_empty() {
        assert!(filter_supported(vec![candidate("Mp4", 1.0), candidate("Fm-Hls", 2.0)]).is_empty());
    }
}
