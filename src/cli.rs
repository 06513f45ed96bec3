use clap::{Args, Parser, Subcommand};

use hisame::catalog::TranslationType;
use hisame::episodes::{ShowQuery, ShowTitles};

#[derive(Debug, Parser)]
#[command(
    name = "hisame",
    version,
    about = "Find a tracked anime in the catalog and play it through mpv"
)]
pub struct Cli {
    /// Episode list to use (sub or dub), overriding the config
    #[arg(long, global = true, value_parser = parse_translation)]
    pub translation: Option<TranslationType>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the stitched episode list of a show
    Episodes {
        #[command(flatten)]
        show: ShowArgs,
    },
    /// Print the supported sources of one episode, best first
    Sources {
        #[command(flatten)]
        show: ShowArgs,
        /// Overall episode number
        #[arg(long)]
        episode: u32,
    },
    /// Play one episode
    Play {
        #[command(flatten)]
        show: ShowArgs,
        /// Overall episode number
        #[arg(long)]
        episode: u32,
    },
    /// Check the environment
    Doctor,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Tracking-service id (AniList), 0 if unknown
    #[arg(long, default_value_t = 0)]
    pub id: u64,
    /// Romanized title
    #[arg(long)]
    pub title: String,
    #[arg(long, default_value = "")]
    pub english: String,
    #[arg(long, default_value = "")]
    pub native: String,
    /// Alternative title, may be repeated
    #[arg(long = "synonym")]
    pub synonyms: Vec<String>,
}

impl ShowArgs {
    pub fn to_query(&self) -> ShowQuery {
        ShowQuery {
            external_id: self.id,
            titles: ShowTitles {
                romaji: self.title.clone(),
                english: self.english.clone(),
                native: self.native.clone(),
            },
            synonyms: self.synonyms.clone(),
        }
    }
}

fn parse_translation(value: &str) -> Result<TranslationType, String> {
    value
        .parse()
        .map_err(|()| format!("'{}' is not a translation type (expected sub or dub)", value))
}
