use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgba};
use percent_encoding::{NON_ALPHANUMERIC, percent_encode};
use uuid::Uuid;

use super::*;

fn png_bytes(w: u32, h: u32, color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(w, h, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

// --- local_path ---

#[test]
fn local_path_file_url() {
    assert_eq!(local_path("file:///tmp/a.png"), Some(PathBuf::from("/tmp/a.png")));
}

#[test]
fn local_path_file_url_is_percent_decoded() {
    assert_eq!(local_path("file:///tmp/my%20photo.png"), Some(PathBuf::from("/tmp/my photo.png")));
}

#[test]
fn local_path_bare_path_is_literal() {
    assert_eq!(local_path("pics/100%25.png"), Some(PathBuf::from("pics/100%25.png")));
}

#[test]
fn local_path_bare_path() {
    assert_eq!(local_path("pics/a.png"), Some(PathBuf::from("pics/a.png")));
}

#[test]
fn local_path_rejects_remote_and_data() {
    assert_eq!(local_path("https://example.test/a.png"), None);
    assert_eq!(local_path("data:image/png;base64,AAAA"), None);
}

// --- decode ---

#[test]
fn decode_bytes_png() {
    let img = decode_bytes(&png_bytes(3, 2, [10, 20, 30, 255])).unwrap();
    assert_eq!(img.dimensions(), (3, 2));
    assert_eq!(img.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
}

#[test]
fn decode_bytes_garbage_fails() {
    let err = decode_bytes(b"not an image").unwrap_err();
    assert!(matches!(err, DecodeError::Image(_)));
    assert_eq!(err.error_code(), "E_DECODE");
}

#[tokio::test]
async fn fetch_embedded_shares_bytes() {
    let source = ImageSource::embedded("image/png", vec![1u8, 2]);
    let bytes = fetch_source(&source).await.unwrap();
    assert_eq!(&*bytes, &[1, 2]);
}

#[tokio::test]
async fn fetch_remote_url_is_unsupported() {
    let err =
        fetch_source(&ImageSource::Url("https://example.test/a.png".into())).await.unwrap_err();
    assert!(matches!(err, DecodeError::UnsupportedUrl(_)));
}

#[tokio::test]
async fn fetch_local_file_url() {
    let path = std::env::temp_dir().join(format!("dropcanvas-decode-{}.png", Uuid::now_v7()));
    tokio::fs::write(&path, png_bytes(1, 1, [0, 0, 0, 255])).await.unwrap();

    let url = format!("file://{}", path.display());
    let bytes = fetch_source(&ImageSource::Url(url)).await.unwrap();
    assert_eq!(decode_bytes(&bytes).unwrap().dimensions(), (1, 1));

    tokio::fs::remove_file(&path).await.unwrap();
}

#[tokio::test]
async fn fetch_local_file_url_with_escaped_space() {
    let path = std::env::temp_dir().join(format!("dropcanvas decode {}.png", Uuid::now_v7()));
    tokio::fs::write(&path, png_bytes(2, 3, [0, 0, 0, 255])).await.unwrap();

    let url = format!("file://{}", path.display().to_string().replace(' ', "%20"));
    let bytes = fetch_source(&ImageSource::Url(url)).await.unwrap();
    assert_eq!(decode_bytes(&bytes).unwrap().dimensions(), (2, 3));

    tokio::fs::remove_file(&path).await.unwrap();
}

// --- data: URLs ---

#[test]
fn data_url_payload_plain_and_percent_encoded() {
    assert_eq!(data_url_payload("text/plain,hi%20there").unwrap(), b"hi there");
    assert_eq!(data_url_payload(",").unwrap(), b"");
}

#[test]
fn data_url_payload_base64_ignores_whitespace() {
    assert_eq!(data_url_payload("image/png;base64,aGVs\nbG8=").unwrap(), b"hello");
    assert_eq!(data_url_payload("image/png;base64,aGVs bG8=").unwrap(), b"hello");
}

#[test]
fn data_url_without_separator_is_malformed() {
    let err = data_url_payload("image/png;base64").unwrap_err();
    assert!(matches!(err, DecodeError::DataUrl(_)));
    assert_eq!(err.error_code(), "E_DATA_URL");
    assert!(data_url_payload("image/png;base64,@@@").is_err());
}

#[tokio::test]
async fn load_source_decodes_base64_data_url() {
    let url = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(1, 1, [9, 8, 7, 255])));
    let image = load_source(ImageSource::Url(url)).await.unwrap();
    assert_eq!(image.dimensions(), (1, 1));
    assert_eq!(image.get_pixel(0, 0), &Rgba([9, 8, 7, 255]));
}

#[tokio::test]
async fn load_source_decodes_percent_encoded_data_url() {
    let png = png_bytes(2, 2, [1, 1, 1, 255]);
    let url = format!("data:image/png,{}", percent_encode(&png, NON_ALPHANUMERIC));
    let image = load_source(ImageSource::Url(url)).await.unwrap();
    assert_eq!(image.dimensions(), (2, 2));
}

// --- ImageCache ---

#[test]
fn cache_tracks_pending_then_ready() {
    let mut cache = ImageCache::new();
    let id = Uuid::now_v7();
    cache.mark_pending(id);
    assert_eq!(cache.pending(), 1);
    assert!(cache.ready(&id).is_none());

    assert!(cache.resolve(id, Ok(Arc::new(RgbaImage::new(2, 2)))));
    assert_eq!(cache.pending(), 0);
    assert_eq!(cache.ready(&id).unwrap().dimensions(), (2, 2));
}

#[test]
fn cache_records_failures() {
    let mut cache = ImageCache::new();
    let id = Uuid::now_v7();
    cache.mark_pending(id);
    cache.resolve(id, Err(DecodeError::UnsupportedUrl("https://x".into())));
    assert!(matches!(cache.get(&id), Some(Decoded::Failed(msg)) if msg.contains("https://x")));
    assert!(cache.ready(&id).is_none());
}

#[test]
fn cache_drops_unknown_results() {
    let mut cache = ImageCache::new();
    assert!(!cache.resolve(Uuid::now_v7(), Ok(Arc::new(RgbaImage::new(1, 1)))));
    assert!(cache.get(&Uuid::nil()).is_none());
}

#[tokio::test]
async fn load_source_decodes_embedded_png() {
    let source = ImageSource::embedded("image/png", png_bytes(5, 4, [1, 2, 3, 255]));
    let image = load_source(source).await.unwrap();
    assert_eq!(image.dimensions(), (5, 4));
}

#[tokio::test]
async fn load_source_reports_bad_bytes() {
    let source = ImageSource::embedded("image/png", b"garbage".to_vec());
    assert!(matches!(load_source(source).await, Err(DecodeError::Image(_))));
}
