use std::collections::HashSet;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::prelude::IndexedRandom;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tracing::{debug, info};

/// A text post ready to be narrated.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryPost {
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: String,
}

pub trait StorySource {
    fn fetch_story(&self) -> impl Future<Output = anyhow::Result<StoryPost>> + Send;
}

#[derive(Debug, Deserialize)]
pub struct RedditListing {
    pub data: RedditListingData,
}

#[derive(Debug, Deserialize)]
pub struct RedditListingData {
    pub children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
pub struct RedditChild {
    pub data: RedditPost,
}

#[derive(Debug, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub permalink: String,
    pub is_self: Option<bool>,
    pub over_18: Option<bool>,
    pub stickied: Option<bool>,
}

pub struct RedditSource {
    pub subreddit: String,
    pub limit: usize,
    pub used_posts: PathBuf,
    /// Choose among all eligible posts at random rather than taking the first.
    pub random: bool,
}

impl StorySource for RedditSource {
    async fn fetch_story(&self) -> anyhow::Result<StoryPost> {
        let url = format!(
            "https://www.reddit.com/r/{}/hot.json?limit={}",
            self.subreddit, self.limit
        );
        let client = reqwest::Client::new();
        let res = client
            .get(&url)
            .header(USER_AGENT, "storyreel/0.1")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let parsed: RedditListing =
            serde_json::from_str(&res).context("unexpected reddit listing format")?;

        let mut used_ids = load_used_ids(&self.used_posts)?;
        let post = pick_story(parsed, &used_ids, self.random)
            .ok_or_else(|| anyhow::anyhow!("No suitable posts found in r/{}", self.subreddit))?;

        info!("Selected post: {}", post.title);
        used_ids.insert(post.id.clone());
        save_used_ids(&self.used_posts, &used_ids)?;
        Ok(post)
    }
}

/// Self posts with a body that are neither NSFW, pinned, nor used before,
/// in listing order.
pub fn eligible_stories(listing: RedditListing, used_ids: &HashSet<String>) -> Vec<StoryPost> {
    listing
        .data
        .children
        .into_iter()
        .filter_map(|child| {
            let post = child.data;
            let is_self = post.is_self.unwrap_or(true);
            let nsfw = post.over_18.unwrap_or(false);
            let stickied = post.stickied.unwrap_or(false);

            if nsfw || stickied || !is_self || used_ids.contains(&post.id) {
                debug!("Skipping post (NSFW, pinned, link or already used): {}", post.title);
                return None;
            }
            let title = post.title.trim();
            let body = post.selftext.trim();
            if title.is_empty() || body.is_empty() {
                debug!("Skipping post without text: {}", post.id);
                return None;
            }
            Some(StoryPost {
                id: post.id.clone(),
                title: title.to_string(),
                body: body.to_string(),
                url: format!("https://www.reddit.com{}", post.permalink),
            })
        })
        .collect()
}

/// The first eligible post, or a random one when `random` is set.
pub fn pick_story(listing: RedditListing, used_ids: &HashSet<String>, random: bool) -> Option<StoryPost> {
    let stories = eligible_stories(listing, used_ids);
    debug!("{} eligible posts", stories.len());
    if random {
        stories.choose(&mut rand::rng()).cloned()
    } else {
        stories.into_iter().next()
    }
}

fn load_used_ids(path: &Path) -> anyhow::Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let data = fs::read_to_string(path)?;
    let ids: Vec<String> = serde_json::from_str(&data)?;
    Ok(ids.into_iter().collect())
}

fn save_used_ids(path: &Path, ids: &HashSet<String>) -> anyhow::Result<()> {
    let mut sorted: Vec<&String> = ids.iter().collect();
    sorted.sort();
    let data = serde_json::to_string_pretty(&sorted)?;
    fs::write(path, data)?;
    Ok(())
}
