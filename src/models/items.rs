use std::borrow::Cow;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::{Validate, ValidationError};

use crate::models::users::UserId;
use crate::storage::MediaStorage;
use crate::thumbnails::{self, Thumbnail, ThumbnailCache};

pub type ItemId = i32;

pub const GEO_LOCATION_MESSAGE: &str = "緯度：-90.000000 ~ 90.000000 / 経度: -180.000000 ~ 180.000000\
    （小数点以下６桁以内）を指定します。緯度と経度はカンマ「,」で区切ります。例：35.658581,139.745433 \
    / Latitude must be between -90.000000 and 90.000000 and longitude between -180.000000 and \
    180.000000, with at most 6 decimal places, separated by a comma \",\". \
    Example: 35.658581,139.745433";

lazy_static::lazy_static! {
    /// Latitude and longitude separated by a comma and an optional space, each with 1 to 6
    /// fractional digits. Anchored at both ends.
    pub static ref GEO_LOCATION_RE: Regex = Regex::new(
        r"^-?([0-8]?[0-9]|90)\.[0-9]{1,6},\s?-?((1?[0-7]?|[0-9]?)[0-9]|180)\.[0-9]{1,6}$"
    )
    .expect("geo location pattern is a valid regex");
}

/// Empty strings are accepted, anything else has to be a full coordinate pair.
pub fn validate_geo_location(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || GEO_LOCATION_RE.is_match(value) {
        return Ok(());
    }

    let mut error = ValidationError::new("geo_location");
    error.message = Some(Cow::from(GEO_LOCATION_MESSAGE));
    error.add_param(Cow::from("value"), &value);
    Err(error)
}

/// A stored photo record.
///
/// The four audit fields are only ever written by the store, see
/// [`crate::db::items::ItemProvider`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub title: Option<String>,
    /// Storage-relative path of the uploaded image, e.g. `images/IMG_0001.jpg`.
    pub image: Option<String>,
    pub shooting_time: Option<OffsetDateTime>,
    pub geo_location: Option<String>,
    pub location: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_by: Option<UserId>,
    pub updated_at: Option<OffsetDateTime>,
}

impl Item {
    pub const VERBOSE_NAME: &'static str = "画像データ";
    pub const VERBOSE_NAME_PLURAL: &'static str = "画像データ";

    /// The user-editable part of the record.
    pub fn changes(&self) -> ItemChanges {
        ItemChanges {
            title: self.title.clone(),
            image: self.image.clone(),
            shooting_time: self.shooting_time,
            geo_location: self.geo_location.clone(),
            location: self.location.clone(),
        }
    }

    /// The 400x300 JPEG thumbnail of the current image.
    ///
    /// Returns `Ok(None)` when the record has no image.
    #[tracing::instrument(skip(self, storage, cache), fields(item = %self))]
    pub async fn image_thumbnail(
        &self,
        storage: &MediaStorage,
        cache: &ThumbnailCache,
    ) -> Result<Option<Thumbnail>, thumbnails::Error> {
        let image = match self.image.as_deref() {
            Some(image) if !image.is_empty() => image,
            _ => return Ok(None),
        };

        let source = storage.read(image).await?;
        let thumbnail = cache.get_or_derive(&source).await?;
        Ok(Some(thumbnail))
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.id)
    }
}

/// Candidate field set for creating or editing an [`Item`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct ItemChanges {
    #[validate(length(max = 100))]
    pub title: Option<String>,
    #[validate(length(max = 100))]
    pub image: Option<String>,
    pub shooting_time: Option<OffsetDateTime>,
    #[validate(length(max = 100), custom(function = "validate_geo_location"))]
    pub geo_location: Option<String>,
    #[validate(length(max = 100))]
    pub location: Option<String>,
}

impl ItemChanges {
    pub(crate) fn title_or_default(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    pub(crate) fn geo_location_or_default(&self) -> &str {
        self.geo_location.as_deref().unwrap_or_default()
    }

    pub(crate) fn location_or_default(&self) -> &str {
        self.location.as_deref().unwrap_or_default()
    }
}
