//! Record types for the four synchronized collections.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::collection::{Collection, Collections};
use crate::error::SyncError;

/// The four collections mirrored by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Packages,
    Blogs,
    Destinations,
    LiveTickets,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::Packages,
        CollectionKind::Blogs,
        CollectionKind::Destinations,
        CollectionKind::LiveTickets,
    ];

    /// Remote table name
    pub fn table(self) -> &'static str {
        match self {
            CollectionKind::Packages => "packages",
            CollectionKind::Blogs => "blogs",
            CollectionKind::Destinations => "destinations",
            CollectionKind::LiveTickets => "live_tickets",
        }
    }

    /// Object-storage folder for images attached to this record type
    pub fn storage_folder(self) -> &'static str {
        match self {
            CollectionKind::Packages => "packages",
            CollectionKind::Blogs => "blogs",
            CollectionKind::Destinations => "destinations",
            CollectionKind::LiveTickets => "live-tickets",
        }
    }

    /// Only live-ticket write failures are surfaced to the user as an alert.
    pub fn alerts_on_write_failure(self) -> bool {
        matches!(self, CollectionKind::LiveTickets)
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for CollectionKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "packages" | "package" => Ok(CollectionKind::Packages),
            "blogs" | "blog" => Ok(CollectionKind::Blogs),
            "destinations" | "destination" => Ok(CollectionKind::Destinations),
            "live_tickets" | "live_ticket" | "tickets" => Ok(CollectionKind::LiveTickets),
            other => Err(SyncError::UnknownCollection(other.to_string())),
        }
    }
}

/// Prefix that marks an image as a freshly attached inline payload.
pub const INLINE_PREFIX: &str = "data:";

/// Image field of a record.
///
/// Serialized as a plain string in both cases. Only `Inline` triggers an
/// upload before a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageRef {
    /// Base64 `data:` URI attached in the editor, not yet uploaded
    Inline(String),
    /// Publicly addressable reference to an uploaded (or external) image
    Hosted(String),
}

impl ImageRef {
    pub fn is_inline(&self) -> bool {
        matches!(self, ImageRef::Inline(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageRef::Inline(s) | ImageRef::Hosted(s) => s,
        }
    }
}

impl Default for ImageRef {
    fn default() -> Self {
        ImageRef::Hosted(String::new())
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        if value.starts_with(INLINE_PREFIX) {
            ImageRef::Inline(value)
        } else {
            ImageRef::Hosted(value)
        }
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        ImageRef::from(value.to_string())
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        match value {
            ImageRef::Inline(s) | ImageRef::Hosted(s) => s,
        }
    }
}

/// Price direction shown next to a live ticket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    #[default]
    Stable,
}

impl FromStr for Trend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Trend::Up),
            "down" => Ok(Trend::Down),
            "stable" => Ok(Trend::Stable),
            other => Err(format!("unknown trend {other:?}, expected up, down or stable")),
        }
    }
}

/// Tour package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default, deserialize_with = "de_id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub destination: String,
    pub price: f64,
    /// Free-form label such as "5 Days / 4 Nights"
    pub duration: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_default")]
    pub image: ImageRef,
    #[serde(default, deserialize_with = "null_default")]
    pub rating: f64,
    #[serde(default)]
    pub itinerary: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub is_starred: bool,
}

/// Blog post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    #[serde(default, deserialize_with = "de_id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub excerpt: String,
    #[serde(default)]
    pub content: Option<String>,
    /// Publish date as entered by the editor
    pub date: String,
    #[serde(default, deserialize_with = "null_default")]
    pub author: String,
    #[serde(default, deserialize_with = "null_default")]
    pub image: ImageRef,
    #[serde(default, deserialize_with = "null_default")]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default, deserialize_with = "de_id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub region: String,
    #[serde(default, deserialize_with = "null_default")]
    pub image: ImageRef,
    #[serde(default, deserialize_with = "null_default")]
    pub details: String,
}

/// Live flight ticket price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTicket {
    #[serde(default, deserialize_with = "de_id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "from")]
    pub origin: String,
    #[serde(rename = "to")]
    pub target: String,
    /// Price in Ugandan shillings
    pub price_ugx: u64,
    #[serde(default)]
    pub min_usd: Option<f64>,
    #[serde(default)]
    pub max_usd: Option<f64>,
    #[serde(default, deserialize_with = "null_default")]
    pub trend: Trend,
}

/// Common behaviour of the four record types.
pub trait Record:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    const KIND: CollectionKind;

    fn id(&self) -> &str;

    /// Image field, for record types that carry one
    fn image(&self) -> Option<&ImageRef> {
        None
    }

    fn image_mut(&mut self) -> Option<&mut ImageRef> {
        None
    }

    fn slot(collections: &Collections) -> &Collection<Self>;

    fn slot_mut(collections: &mut Collections) -> &mut Collection<Self>;

    fn from_row(row: serde_json::Value) -> Result<Self, SyncError> {
        Ok(serde_json::from_value(row)?)
    }
}

impl Record for Package {
    const KIND: CollectionKind = CollectionKind::Packages;

    fn id(&self) -> &str {
        &self.id
    }

    fn image(&self) -> Option<&ImageRef> {
        Some(&self.image)
    }

    fn image_mut(&mut self) -> Option<&mut ImageRef> {
        Some(&mut self.image)
    }

    fn slot(collections: &Collections) -> &Collection<Self> {
        &collections.packages
    }

    fn slot_mut(collections: &mut Collections) -> &mut Collection<Self> {
        &mut collections.packages
    }
}

impl Record for BlogPost {
    const KIND: CollectionKind = CollectionKind::Blogs;

    fn id(&self) -> &str {
        &self.id
    }

    fn image(&self) -> Option<&ImageRef> {
        Some(&self.image)
    }

    fn image_mut(&mut self) -> Option<&mut ImageRef> {
        Some(&mut self.image)
    }

    fn slot(collections: &Collections) -> &Collection<Self> {
        &collections.blogs
    }

    fn slot_mut(collections: &mut Collections) -> &mut Collection<Self> {
        &mut collections.blogs
    }
}

impl Record for Destination {
    const KIND: CollectionKind = CollectionKind::Destinations;

    fn id(&self) -> &str {
        &self.id
    }

    fn image(&self) -> Option<&ImageRef> {
        Some(&self.image)
    }

    fn image_mut(&mut self) -> Option<&mut ImageRef> {
        Some(&mut self.image)
    }

    fn slot(collections: &Collections) -> &Collection<Self> {
        &collections.destinations
    }

    fn slot_mut(collections: &mut Collections) -> &mut Collection<Self> {
        &mut collections.destinations
    }
}

// Live tickets carry no image, so writes never upload.
impl Record for LiveTicket {
    const KIND: CollectionKind = CollectionKind::LiveTickets;

    fn id(&self) -> &str {
        &self.id
    }

    fn slot(collections: &Collections) -> &Collection<Self> {
        &collections.live_tickets
    }

    fn slot_mut(collections: &mut Collections) -> &mut Collection<Self> {
        &mut collections.live_tickets
    }
}

/// Ids arrive as strings or numbers depending on the column type.
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(id_string(&value).unwrap_or_default())
}

/// PostgREST sends unset columns as `null`; treat that like a missing key.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
