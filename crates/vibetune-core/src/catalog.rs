//! Music catalog access: the search seam, a Spotify Web API client, and a
//! lazily connected, TTL-bounded connection handle.

use crate::types::Track;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;

const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
/// The search endpoint caps `limit` at 50.
pub const MAX_SEARCH_LIMIT: usize = 50;
/// Refresh the access token this long before it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECTION_TTL: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog credentials not found (set SPOTIPY_CLIENT_ID and SPOTIPY_CLIENT_SECRET)")]
    MissingCredentials,
    #[error("catalog authentication failed: {0}")]
    Auth(String),
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("catalog connection unavailable: {0}")]
    Unavailable(String),
}

/// Track search against a remote catalog.
pub trait Catalog {
    /// Search tracks for `query`; null entries in the remote response are dropped.
    fn search_tracks(&mut self, query: &str, limit: usize, market: &str) -> Result<Vec<Track>, CatalogError>;
}

impl<C: Catalog + ?Sized> Catalog for Box<C> {
    fn search_tracks(&mut self, query: &str, limit: usize, market: &str) -> Result<Vec<Track>, CatalogError> {
        (**self).search_tracks(query, limit, market)
    }
}

/// Application-level credentials; search needs no per-user auth.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Spotify Web API client using the client-credentials flow.
pub struct SpotifyCatalog {
    client: Client,
    credentials: Credentials,
    token: Option<AccessToken>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<Option<SpotifyTrack>>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    preview_url: Option<String>,
    #[serde(default)]
    external_urls: ExternalUrls,
    album: Option<SpotifyAlbum>,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Deserialize, Default)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Deserialize)]
struct SpotifyImage {
    url: String,
}

impl SpotifyTrack {
    fn into_track(self) -> Option<Track> {
        let artist = self.artists.into_iter().next()?.name;
        let external_url = self.external_urls.spotify?;
        // Images come largest first; the second one is the medium size.
        let artwork_url = self.album.and_then(|album| {
            let mut images = album.images.into_iter();
            let first = images.next()?;
            Some(images.next().unwrap_or(first).url)
        });
        Some(Track {
            title: self.name,
            artist,
            external_url,
            preview_url: self.preview_url,
            artwork_url,
        })
    }
}

fn parse_search(body: SearchResponse) -> Vec<Track> {
    body.tracks
        .items
        .into_iter()
        .flatten()
        .filter_map(SpotifyTrack::into_track)
        .collect()
}

impl SpotifyCatalog {
    pub fn new(credentials: Credentials) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            credentials,
            token: None,
        })
    }

    /// Build a client and validate the credentials with a one-track search.
    pub fn connect(credentials: Credentials, market: &str) -> Result<Self, CatalogError> {
        let mut catalog = Self::new(credentials)?;
        catalog.search_tracks("test", 1, market)?;
        tracing::info!(client_id = %catalog.credentials.client_id, "connected to Spotify");
        Ok(catalog)
    }

    fn access_token(&mut self) -> Result<String, CatalogError> {
        if let Some(token) = &self.token {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(SPOTIFY_TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(CatalogError::Auth(format!("{status}: {body}")));
        }

        let token: TokenResponse = response.json()?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(expires_in = token.expires_in, "obtained catalog access token");

        self.token = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

impl Catalog for SpotifyCatalog {
    fn search_tracks(&mut self, query: &str, limit: usize, market: &str) -> Result<Vec<Track>, CatalogError> {
        let token = self.access_token()?;
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT).to_string();

        let response = self
            .client
            .get(format!("{SPOTIFY_API_BASE}/search"))
            .bearer_auth(token)
            .query(&[("q", query), ("type", "track"), ("limit", &limit), ("market", market)])
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            if status == 401 {
                self.token = None;
            }
            let body = response.text().unwrap_or_default();
            return Err(CatalogError::Status { status, body });
        }

        let tracks = parse_search(response.json()?);
        tracing::debug!(query, market, count = tracks.len(), "catalog search");
        Ok(tracks)
    }
}

type Connector<C> = Box<dyn FnMut() -> Result<C, CatalogError> + Send>;

enum Slot<C> {
    Empty,
    Connected { catalog: C, at: Instant },
    Failed { reason: String, at: Instant },
}

/// Lazily connected catalog handle.
///
/// The first [`get`](Self::get) runs the connector; its outcome, success or
/// failure, is reused until `ttl` elapses, after which the next call connects
/// again. Not thread-safe: the owner serializes access.
pub struct CatalogConnection<C> {
    connector: Connector<C>,
    ttl: Duration,
    slot: Slot<C>,
}

impl<C: Catalog> CatalogConnection<C> {
    pub fn new(ttl: Duration, connector: impl FnMut() -> Result<C, CatalogError> + Send + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            ttl,
            slot: Slot::Empty,
        }
    }

    fn expired(&self) -> bool {
        match &self.slot {
            Slot::Empty => true,
            Slot::Connected { at, .. } | Slot::Failed { at, .. } => at.elapsed() >= self.ttl,
        }
    }

    pub fn get(&mut self) -> Result<&mut C, CatalogError> {
        if self.expired() {
            self.slot = match (self.connector)() {
                Ok(catalog) => Slot::Connected {
                    catalog,
                    at: Instant::now(),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "catalog connection failed");
                    Slot::Failed {
                        reason: e.to_string(),
                        at: Instant::now(),
                    }
                }
            };
        }

        match &mut self.slot {
            Slot::Connected { catalog, .. } => Ok(catalog),
            Slot::Failed { reason, .. } => Err(CatalogError::Unavailable(reason.clone())),
            Slot::Empty => Err(CatalogError::Unavailable("not connected".into())),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.slot, Slot::Connected { .. }) && !self.expired()
    }
}

impl<C: Catalog> Catalog for CatalogConnection<C> {
    fn search_tracks(&mut self, query: &str, limit: usize, market: &str) -> Result<Vec<Track>, CatalogError> {
        self.get()?.search_tracks(query, limit, market)
    }
}
