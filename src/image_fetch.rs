//! Remote Image Fetch
//!
//! Best-effort enrichment of a matched record with its NDVI map. The image
//! service is asked for a URL (`POST /query`), then the image itself is
//! downloaded and decoded. No failure here ever blocks a data entry.

use crate::error::{GreenIndexError, Result};
use crate::query_extractor::FilterTriple;
use async_trait::async_trait;
use image::{GenericImageView, ImageFormat};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// A decoded NDVI visualization.
#[derive(Debug, Clone, PartialEq)]
pub struct NdviImage {
    pub source_url: String,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl NdviImage {
    /// Decode `bytes`; fails if they are not a supported image.
    pub fn decode(source_url: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&bytes)
            .map_err(|e| GreenIndexError::ImageFetch(format!("unrecognised image data: {}", e)))?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| GreenIndexError::ImageFetch(format!("failed to decode image: {}", e)))?;
        let (width, height) = decoded.dimensions();

        Ok(Self {
            source_url: source_url.into(),
            format,
            width,
            height,
            bytes,
        })
    }
}

#[derive(Debug, Serialize)]
struct ImageQuery {
    state: String,
    month: String,
    year: i32,
}

#[derive(Debug, Deserialize)]
struct ImageQueryResponse {
    ndvi_url: Option<String>,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// `Ok(None)` means no image is offered; `Err` is an `ImageFetch` failure.
    async fn try_fetch_image(&self, triple: &FilterTriple) -> Result<Option<NdviImage>>;

    /// Never fails: every error is logged and becomes "no image".
    async fn fetch_image(&self, triple: &FilterTriple) -> Option<NdviImage> {
        match self.try_fetch_image(triple).await {
            Ok(image) => image,
            Err(e) => {
                warn!("No image for {}: {}", triple, e);
                None
            }
        }
    }
}

/// Provider used when image fetching is disabled.
pub struct NoImages;

#[async_trait]
impl ImageProvider for NoImages {
    async fn try_fetch_image(&self, _triple: &FilterTriple) -> Result<Option<NdviImage>> {
        Ok(None)
    }
}

/// HTTP client for the NDVI image service.
pub struct ImageFetcher {
    http: reqwest::Client,
    query_url: Url,
}

impl ImageFetcher {
    /// `service_url` is the service root or its `/query` endpoint.
    pub fn new(service_url: &str, timeout: Duration) -> Result<Self> {
        let trimmed = service_url.trim_end_matches('/');
        let query_url = if trimmed.ends_with("/query") {
            trimmed.to_string()
        } else {
            format!("{}/query", trimmed)
        };
        let query_url = Url::parse(&query_url).map_err(|e| {
            GreenIndexError::Config(format!("invalid image service URL '{}': {}", service_url, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GreenIndexError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, query_url })
    }

    pub fn query_url(&self) -> &str {
        self.query_url.as_str()
    }
}

#[async_trait]
impl ImageProvider for ImageFetcher {
    async fn try_fetch_image(&self, triple: &FilterTriple) -> Result<Option<NdviImage>> {
        let payload = ImageQuery {
            state: triple.state.trim().to_lowercase(),
            month: triple.month.trim().to_lowercase(),
            year: triple.year,
        };

        let response = self
            .http
            .post(self.query_url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| GreenIndexError::ImageFetch(format!("image service call failed: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(GreenIndexError::ImageFetch(format!(
                "image service returned {}",
                response.status()
            )));
        }

        let body: ImageQueryResponse = response
            .json()
            .await
            .map_err(|e| GreenIndexError::ImageFetch(format!("invalid image service response: {}", e)))?;
        let ndvi_url = body
            .ndvi_url
            .ok_or_else(|| GreenIndexError::ImageFetch("response has no ndvi_url".to_string()))?;

        // Relative URLs resolve against the service.
        let image_url = self
            .query_url
            .join(&ndvi_url)
            .map_err(|e| GreenIndexError::ImageFetch(format!("invalid ndvi_url '{}': {}", ndvi_url, e)))?;
        debug!("Downloading NDVI image from {}", image_url);

        let image_response = self
            .http
            .get(image_url.clone())
            .send()
            .await
            .map_err(|e| GreenIndexError::ImageFetch(format!("image download failed: {}", e)))?;
        if !image_response.status().is_success() {
            return Err(GreenIndexError::ImageFetch(format!(
                "image download returned {}",
                image_response.status()
            )));
        }
        let bytes = image_response
            .bytes()
            .await
            .map_err(|e| GreenIndexError::ImageFetch(format!("image download failed: {}", e)))?;

        NdviImage::decode(image_url.as_str(), bytes.to_vec()).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubHttpServer;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(3, 2));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageOutputFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn fetcher(server: &StubHttpServer) -> ImageFetcher {
        ImageFetcher::new(&server.base_url(), Duration::from_secs(5)).unwrap()
    }

    fn triple() -> FilterTriple {
        FilterTriple::new("Andhra Pradesh", "May", 2025)
    }

    #[test]
    fn test_query_url_forms() {
        let root = ImageFetcher::new("https://ndvi.example.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(root.query_url(), "https://ndvi.example.com/query");
        let explicit = ImageFetcher::new("https://ndvi.example.com/query", Duration::from_secs(1)).unwrap();
        assert_eq!(explicit.query_url(), "https://ndvi.example.com/query");
        assert!(ImageFetcher::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_fetch_image_success() {
        let png = png_bytes();
        let server = StubHttpServer::start(move |request| match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/query") => {
                assert!(request.body.contains(r#""state":"andhra pradesh""#));
                assert!(request.body.contains(r#""month":"may""#));
                assert!(request.body.contains(r#""year":2025"#));
                (200, "application/json", br#"{"ndvi_url": "/maps/ap-may-2025.png"}"#.to_vec())
            }
            ("GET", "/maps/ap-may-2025.png") => (200, "image/png", png.clone()),
            _ => (404, "text/plain", Vec::new()),
        })
        .await;

        let image = fetcher(&server).fetch_image(&triple()).await.unwrap();
        assert_eq!(image.format, ImageFormat::Png);
        assert_eq!((image.width, image.height), (3, 2));
        assert!(image.source_url.ends_with("/maps/ap-may-2025.png"));
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn test_non_200_is_no_image() {
        let server = StubHttpServer::start(|_| (500, "text/plain", b"down".to_vec())).await;
        let fetcher = fetcher(&server);
        assert!(fetcher.fetch_image(&triple()).await.is_none());
        assert!(matches!(
            fetcher.try_fetch_image(&triple()).await,
            Err(GreenIndexError::ImageFetch(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_ndvi_url_is_no_image() {
        let server = StubHttpServer::start(|_| (200, "application/json", br#"{"status":"ok"}"#.to_vec())).await;
        assert!(fetcher(&server).fetch_image(&triple()).await.is_none());
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_bytes_is_no_image() {
        let server = StubHttpServer::start(|request| match request.path.as_str() {
            "/query" => (200, "application/json", br#"{"ndvi_url": "/broken.png"}"#.to_vec()),
            _ => (200, "image/png", b"definitely not a png".to_vec()),
        })
        .await;
        assert!(fetcher(&server).fetch_image(&triple()).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_no_image() {
        let fetcher = ImageFetcher::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(fetcher.fetch_image(&triple()).await.is_none());
    }

    #[tokio::test]
    async fn test_slow_service_times_out_to_no_image() {
        let server = StubHttpServer::start_delayed(Duration::from_secs(2), |_| {
            (200, "application/json", br#"{"ndvi_url": "/map.png"}"#.to_vec())
        })
        .await;
        let fetcher = ImageFetcher::new(&server.base_url(), Duration::from_millis(100)).unwrap();

        assert!(matches!(
            fetcher.try_fetch_image(&triple()).await,
            Err(GreenIndexError::ImageFetch(_))
        ));
        assert!(fetcher.fetch_image(&triple()).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        assert!(NoImages.try_fetch_image(&triple()).await.unwrap().is_none());
    }
}
