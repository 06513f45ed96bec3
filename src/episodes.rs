use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use futures::future::join_all;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{AiredDate, CatalogClient, CatalogEntry, CatalogError, Season, TranslationType};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no candidate shows found in the catalog")]
    NoCandidates,
    #[error("{candidates} candidate shows found but none matched")]
    NoMatch { candidates: usize },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Title variants of the tracked show
#[derive(Debug, Clone, Default)]
pub struct ShowTitles {
    pub romaji: String,
    pub english: String,
    pub native: String,
}

impl ShowTitles {
    /// Non-empty variants in search order
    pub fn variants(&self) -> impl Iterator<Item = &str> {
        [&self.native, &self.english, &self.romaji]
            .into_iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .unique()
    }

    pub fn preferred(&self) -> &str {
        [&self.english, &self.romaji, &self.native]
            .into_iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
            .unwrap_or("Unknown")
    }
}

/// What we know about the tracked show before touching the catalog
#[derive(Debug, Clone, Default)]
pub struct ShowQuery {
    /// Tracking-service id, 0 when unknown
    pub external_id: u64,
    pub titles: ShowTitles,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    ExactId,
    TitleOrSynonym,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchType::ExactId => "exact-id",
            MatchType::TitleOrSynonym => "title-or-synonym",
        })
    }
}

/// One playable episode on the stitched timeline
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRecord {
    pub show_id: String,
    /// Episode label as the catalog knows it
    pub episode_label: String,
    /// Continuous number across every matched catalog entry
    pub overall: u32,
    pub show_title: String,
    pub preferred_title: String,
    pub alt_names: Vec<String>,
    pub air_date: AiredDate,
    pub external_id: Option<u64>,
    pub season: Season,
    pub match_type: MatchType,
}

impl EpisodeRecord {
    /// Title handed to the player window
    pub fn display_title(&self) -> String {
        format!("Ep {} - {}", self.overall, self.preferred_title)
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub episodes: Vec<EpisodeRecord>,
    /// Matched catalog entries in chronological order
    pub shows: Vec<CatalogEntry>,
}

impl Resolution {
    pub fn find_overall(&self, overall: u32) -> Option<&EpisodeRecord> {
        self.episodes.iter().find(|e| e.overall == overall)
    }
}

/// Drop repeated catalog ids, keeping the first occurrence
pub fn dedupe_entries(entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    entries
        .into_iter()
        .unique_by(|e| e.id.clone())
        .collect()
}

/// Decide whether a catalog entry belongs to the tracked show
pub fn match_entry(query: &ShowQuery, entry: &CatalogEntry) -> Option<MatchType> {
    let external_id = entry.external_id();

    if external_id != 0 {
        return (external_id == query.external_id).then_some(MatchType::ExactId);
    }

    let name_matches = entry.names().any(|name| {
        query
            .titles
            .variants()
            .any(|title| title.to_lowercase() == name.trim().to_lowercase())
    });
    if name_matches {
        debug!(catalog_id = %entry.id, name = %entry.name, "matched by title");
        return Some(MatchType::TitleOrSynonym);
    }

    let synonym_matches = entry.trusted_alt_names.iter().any(|alt| {
        let alt = alt.trim().to_lowercase();
        query
            .synonyms
            .iter()
            .any(|synonym| synonym.trim().to_lowercase() == alt)
    });
    if synonym_matches {
        debug!(catalog_id = %entry.id, name = %entry.name, "matched by synonym");
        return Some(MatchType::TitleOrSynonym);
    }

    None
}

/// Dated entries first by air start, then undated ones; ties by catalog id
pub fn sort_chronologically(entries: &mut [(CatalogEntry, MatchType)]) {
    entries.sort_by(|(a, _), (b, _)| {
        let (known_a, known_b) = (a.aired_start.is_known(), b.aired_start.is_known());
        known_b
            .cmp(&known_a)
            .then_with(|| {
                if known_a && known_b {
                    a.aired_start.cmp(&b.aired_start)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Parse labels into sorted local episode numbers, keeping the first label
/// seen for each number
fn local_episodes(entry: &CatalogEntry, translation: TranslationType) -> BTreeMap<u32, String> {
    let mut episodes = BTreeMap::new();
    for label in entry.episode_labels(translation) {
        match label.trim().parse::<u32>() {
            Ok(number) => {
                episodes.entry(number).or_insert_with(|| label.clone());
            }
            Err(e) => {
                warn!(label = %label, catalog_id = %entry.id, error = %e, "skipping unparseable episode label");
            }
        }
    }
    episodes
}

/// Offset for an entry numbered `first..=max`, or `None` when its numbers
/// would not fit in a `u32`
fn entry_offset(offset: u32, first: u32, max: u32, last: Option<u32>) -> Option<u32> {
    let mut offset = offset;
    // Episode 0 labels could otherwise land on a number already used
    if let Some(last) = last
        && first.checked_add(offset)? <= last
    {
        offset = last.checked_add(1)? - first;
    }
    max.checked_add(offset)?;
    Some(offset)
}

/// Stitch chronologically sorted entries into one continuous timeline
pub fn build_timeline(
    shows: &[(CatalogEntry, MatchType)],
    query: &ShowQuery,
    translation: TranslationType,
) -> Vec<EpisodeRecord> {
    let preferred_title = query.titles.preferred().to_string();
    let mut episodes: Vec<EpisodeRecord> = Vec::new();
    let mut offset = 0u32;

    for (show, match_type) in shows {
        let locals = local_episodes(show, translation);
        let (Some(&first), Some(&max)) = (locals.keys().next(), locals.keys().next_back()) else {
            debug!(catalog_id = %show.id, "no playable episodes, skipping");
            continue;
        };

        let last = episodes.last().map(|e| e.overall);
        let Some(show_offset) = entry_offset(offset, first, max, last) else {
            warn!(catalog_id = %show.id, max, offset, "episode numbers overflow, skipping");
            continue;
        };

        let external_id = Some(show.external_id()).filter(|id| *id != 0);
        for (number, label) in &locals {
            episodes.push(EpisodeRecord {
                show_id: show.id.clone(),
                episode_label: label.clone(),
                overall: number + show_offset,
                show_title: show.name.clone(),
                preferred_title: preferred_title.clone(),
                alt_names: show.trusted_alt_names.clone(),
                air_date: show.aired_start,
                external_id,
                season: show.season.clone(),
                match_type: *match_type,
            });
        }

        offset = show_offset + max;
    }

    episodes
}

/// Finds a tracked show in the catalog and lays out its episodes
#[derive(Clone)]
pub struct EpisodeResolver {
    client: CatalogClient,
    translation: TranslationType,
}

impl EpisodeResolver {
    pub fn new(client: CatalogClient, translation: TranslationType) -> Self {
        Self {
            client,
            translation,
        }
    }

    async fn search_candidates(&self, query: &ShowQuery) -> Result<Vec<CatalogEntry>, ResolveError> {
        let searches = query.titles.variants().map(|title| async move {
            (title, self.client.search_shows(title, self.translation).await)
        });

        let mut candidates = Vec::new();
        let mut succeeded = false;
        let mut last_error = None;

        for (title, result) in join_all(searches).await {
            match result {
                Ok(shows) => {
                    debug!(title, count = shows.len(), "title variant searched");
                    succeeded = true;
                    candidates.extend(shows);
                }
                Err(e) => {
                    warn!(title, error = %e, "search failed for title variant");
                    last_error = Some(e);
                }
            }
        }

        if !succeeded && let Some(e) = last_error {
            return Err(e.into());
        }

        Ok(dedupe_entries(candidates))
    }

    pub async fn resolve(&self, query: &ShowQuery) -> Result<Resolution, ResolveError> {
        debug!(
            external_id = query.external_id,
            title = query.titles.preferred(),
            synonyms = ?query.synonyms,
            "resolving episodes"
        );

        let candidates = self.search_candidates(query).await?;
        if candidates.is_empty() {
            return Err(ResolveError::NoCandidates);
        }

        let total = candidates.len();
        let mut matched: Vec<(CatalogEntry, MatchType)> = candidates
            .into_iter()
            .filter_map(|entry| match_entry(query, &entry).map(|m| (entry, m)))
            .collect();

        if matched.is_empty() {
            return Err(ResolveError::NoMatch { candidates: total });
        }

        sort_chronologically(&mut matched);
        let episodes = build_timeline(&matched, query, self.translation);

        info!(
            candidates = total,
            matched = matched.len(),
            episodes = episodes.len(),
            title = query.titles.preferred(),
            "episode timeline built"
        );

        Ok(Resolution {
            episodes,
            shows: matched.into_iter().map(|(entry, _)| entry).collect(),
        })
    }
}
