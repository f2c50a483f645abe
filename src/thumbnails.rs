use std::io::Cursor;
use std::path::PathBuf;

use async_std::fs;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const THUMBNAIL_WIDTH: u32 = 400;
pub const THUMBNAIL_HEIGHT: u32 = 300;
pub const THUMBNAIL_QUALITY: u8 = 60;

/// Directory, relative to the cache root, that thumbnails are written to.
pub const CACHE_PREFIX: &str = "CACHE/images/thumbnail";

// Mixed into the cache key so that changing the parameters above never serves an old file.
const SPEC_FINGERPRINT: &[u8] = b"resize-to-fill:400x300;format:jpeg;quality:60";

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not decode source image")]
    Decode(#[source] image::ImageError),
    #[error("could not encode thumbnail")]
    Encode(#[source] image::ImageError),
    #[error("thumbnail cache I/O error")]
    Io(#[from] std::io::Error),
    #[error("could not read source image")]
    Storage(#[from] crate::storage::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thumbnail {
    /// Path relative to the cache root.
    pub name: String,
    pub data: Vec<u8>,
}

/// Derive the thumbnail for an encoded source image.
///
/// The image is scaled to cover 400x300 and the overflow is cropped from the centre. The
/// result is flattened to RGB and encoded as a quality 60 JPEG. The output only depends on
/// `source`.
pub fn derive_thumbnail(source: &[u8]) -> Result<Vec<u8>, Error> {
    let image = decode_image(source)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        "Decoded source image"
    );

    let resized = image.resize_to_fill(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT, FilterType::Lanczos3);
    let rgb = to_rgb_on_white(&resized);

    encode_jpeg(&rgb)
}

fn decode_image(source: &[u8]) -> Result<DynamicImage, Error> {
    let reader = image::io::Reader::new(Cursor::new(source)).with_guessed_format()?;
    reader.decode().map_err(Error::Decode)
}

/// JPEG has no alpha channel, so transparent pixels are composited onto white.
fn to_rgb_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u16::from(a);
        let blend = |channel: u8| {
            ((u16::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255) as u8
        };
        rgb.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    rgb
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, Error> {
    let mut data = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut data, THUMBNAIL_QUALITY);
    encoder
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(Error::Encode)?;
    Ok(data)
}

/// On-disk cache of derived thumbnails, keyed by a hash of the source bytes.
#[derive(Clone, Debug)]
pub struct ThumbnailCache {
    root: PathBuf,
}

impl ThumbnailCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ThumbnailCache { root: root.into() }
    }

    pub fn cache_key(source: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(SPEC_FINGERPRINT);
        hasher.update(source);
        hex::encode(hasher.finalize())
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_PREFIX)
    }

    /// Return the cached thumbnail for `source`, deriving and storing it on a miss.
    #[tracing::instrument(skip(self, source), fields(source_len = source.len()))]
    pub async fn get_or_derive(&self, source: &[u8]) -> Result<Thumbnail, Error> {
        let key = Self::cache_key(source);
        let name = format!("{}/{}.jpg", CACHE_PREFIX, key);
        let path = self.root.join(&name);

        match fs::read(&path).await {
            Ok(data) => {
                tracing::debug!(%name, "Thumbnail cache hit");
                return Ok(Thumbnail { name, data });
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => return Err(err.into()),
        }

        tracing::info!(%name, "Deriving thumbnail");
        let start = std::time::Instant::now();
        let owned = source.to_vec();
        let data = async_std::task::spawn_blocking(move || derive_thumbnail(&owned)).await?;
        tracing::info!(
            %name,
            "Derived thumbnail in {}s",
            start.elapsed().as_secs_f32()
        );

        let tmp_dir = self.cache_dir().join(".tmp");
        fs::create_dir_all(&tmp_dir).await?;
        let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
        if let Err(err) = fs::write(&tmp_path, &data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(Thumbnail { name, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::{GenericImageView, ImageFormat, ImageOutputFormat, Rgba, RgbaImage};

    fn encode_png(image: DynamicImage) -> Vec<u8> {
        let mut data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut data), ImageOutputFormat::Png)
            .unwrap();
        data
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        encode_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb(color),
        )))
    }

    #[test]
    fn thumbnail_is_400_by_300_jpeg() {
        for (width, height) in [(1600, 1200), (800, 300), (300, 900), (40, 30)].iter() {
            let thumbnail = derive_thumbnail(&solid(*width, *height, [10, 120, 200])).unwrap();

            assert_eq!(image::guess_format(&thumbnail).unwrap(), ImageFormat::Jpeg);
            let decoded = image::load_from_memory(&thumbnail).unwrap();
            assert_eq!(
                decoded.dimensions(),
                (THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT),
                "source {}x{}",
                width,
                height
            );
        }
    }

    #[test]
    fn derivation_is_stable() {
        let source = solid(640, 480, [200, 30, 30]);
        assert_eq!(
            derive_thumbnail(&source).unwrap(),
            derive_thumbnail(&source).unwrap()
        );
    }

    #[test]
    fn wide_sources_are_cropped_from_the_centre() {
        let mut image = RgbImage::from_pixel(1200, 300, Rgb([0, 0, 255]));
        for x in 400..800 {
            for y in 0..300 {
                image.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        let thumbnail = derive_thumbnail(&encode_png(DynamicImage::ImageRgb8(image))).unwrap();
        let decoded = image::load_from_memory(&thumbnail).unwrap().to_rgb8();

        for x in [5, 200, 394].iter() {
            let Rgb([r, _, b]) = *decoded.get_pixel(*x, 150);
            assert!(r > 200 && b < 60, "pixel at x={} is {:?}", x, (r, b));
        }
    }

    #[test]
    fn transparency_becomes_white() {
        let source = encode_png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            400,
            300,
            Rgba([0, 0, 0, 0]),
        )));
        let thumbnail = derive_thumbnail(&source).unwrap();
        let decoded = image::load_from_memory(&thumbnail).unwrap().to_rgb8();

        let Rgb([r, g, b]) = *decoded.get_pixel(200, 150);
        assert!(r > 240 && g > 240 && b > 240);
    }

    #[test]
    fn grayscale_sources_are_converted() {
        let source = encode_png(DynamicImage::ImageLumaA8(image::GrayAlphaImage::from_pixel(
            50,
            50,
            image::LumaA([128, 255]),
        )));
        let decoded = image::load_from_memory(&derive_thumbnail(&source).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            derive_thumbnail(b"definitely not an image"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn cache_key_follows_the_source() {
        let a = solid(10, 10, [1, 2, 3]);
        let b = solid(10, 10, [3, 2, 1]);

        assert_eq!(ThumbnailCache::cache_key(&a), ThumbnailCache::cache_key(&a));
        assert_ne!(ThumbnailCache::cache_key(&a), ThumbnailCache::cache_key(&b));
        assert_eq!(ThumbnailCache::cache_key(&a).len(), 64);
    }

    #[async_std::test]
    async fn cache_stores_and_reuses_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path());
        let source = solid(800, 600, [0, 200, 0]);

        let first = cache.get_or_derive(&source).await.unwrap();
        assert!(first.name.starts_with(CACHE_PREFIX));
        assert!(dir.path().join(&first.name).exists());

        let second = cache.get_or_derive(&source).await.unwrap();
        assert_eq!(first, second);

        let tmp_entries: Vec<_> = std::fs::read_dir(dir.path().join(CACHE_PREFIX).join(".tmp"))
            .unwrap()
            .collect();
        assert!(tmp_entries.is_empty());
    }

    #[async_std::test]
    async fn changed_source_is_not_served_a_stale_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path());

        let red = cache.get_or_derive(&solid(800, 600, [255, 0, 0])).await.unwrap();
        let blue = cache.get_or_derive(&solid(800, 600, [0, 0, 255])).await.unwrap();

        assert_ne!(red.name, blue.name);
        let Rgb([r, _, b]) = *image::load_from_memory(&blue.data)
            .unwrap()
            .to_rgb8()
            .get_pixel(200, 150);
        assert!(b > 200 && r < 60);
    }

    #[async_std::test]
    async fn concurrent_derivations_converge() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path());
        let source = solid(1024, 768, [90, 90, 90]);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let source = source.clone();
            handles.push(async_std::task::spawn(async move {
                cache.get_or_derive(&source).await.unwrap()
            }));
        }

        let mut thumbnails = Vec::new();
        for handle in handles {
            thumbnails.push(handle.await);
        }
        for thumbnail in &thumbnails {
            assert_eq!(thumbnail, &thumbnails[0]);
        }
    }
}
