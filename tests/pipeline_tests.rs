//! End-to-end pipeline tests on the mock backend
//!
//! These exercise loading, preprocessing, postprocessing, compositing and
//! the output strategies without a model file.

use birefnet_bgremove::{
    backends::MockBackend,
    processor::BackendFactory,
    services::{ImageSource, OutputStrategy},
    BackendType, BackgroundRemovalProcessor, BackgroundRemover, BgRemovalError,
    DefaultImageLoader, InferenceBackend, RemovalConfig, RemovalResult, Result,
};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn mock_remover(size: u32) -> BackgroundRemover {
    let processor = BackgroundRemovalProcessor::with_backend(
        RemovalConfig::default(),
        Box::new(MockBackend::with_size(size)),
    )
    .unwrap();
    BackgroundRemover::with_processor(processor).unwrap()
}

/// Remover whose loader bypasses any environment proxy, for local servers
fn url_remover(size: u32) -> BackgroundRemover {
    let processor = BackgroundRemovalProcessor::with_backend(
        RemovalConfig::default(),
        Box::new(MockBackend::with_size(size)),
    )
    .unwrap();
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    BackgroundRemover::with_loader(processor, Arc::new(DefaultImageLoader::with_client(client)))
}

/// Answer every connection with `status` and `body`
async fn serve_fixed(status: &'static str, body: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        }
    });
    addr
}

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    })
}

fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

#[tokio::test]
async fn mask_dimensions_follow_the_original() {
    let mut remover = mock_remover(32);
    for (width, height) in [(64, 64), (120, 45), (17, 300), (1024, 1024)] {
        let result = remover
            .process_result(ImageSource::Image(gradient(width, height).into()))
            .await
            .unwrap();
        assert_eq!(result.mask.dimensions(), (width, height));
        assert_eq!(result.transparent.dimensions(), (width, height));
        assert_eq!(result.original_dimensions, (width, height));
    }
}

#[tokio::test]
async fn upload_original_equals_loaded_source() {
    let source = gradient(80, 60);
    let mut remover = mock_remover(32);

    let (original, _) = remover
        .process_upload(encode(&source, ImageFormat::Png))
        .await
        .unwrap();
    assert_eq!(original, source);
}

#[tokio::test]
async fn transparent_rgb_matches_original() {
    let source = gradient(50, 70);
    let mut remover = mock_remover(32);

    let (original, transparent) = remover
        .process_upload(ImageSource::Image(source.into()))
        .await
        .unwrap();

    for (x, y, pixel) in transparent.enumerate_pixels() {
        let rgb = original.get_pixel(x, y);
        assert_eq!(&pixel.0[..3], &rgb.0[..], "pixel ({x}, {y})");
    }

    let alphas: Vec<u8> = transparent.pixels().map(|p| p[3]).collect();
    assert!(alphas.iter().any(|&a| a > 200), "foreground expected");
    assert!(alphas.iter().any(|&a| a < 10), "background expected");
}

#[tokio::test]
async fn url_mode_fetches_and_processes() {
    let source = gradient(48, 36);
    let addr = serve_fixed("200 OK", encode(&source, ImageFormat::Png)).await;
    let mut remover = url_remover(32);

    let (original, transparent) = remover
        .process_url(&format!("http://{addr}/x.png"))
        .await
        .unwrap();
    assert_eq!(original, source);
    assert_eq!(transparent.dimensions(), (48, 36));
    for (x, y, pixel) in transparent.enumerate_pixels() {
        assert_eq!(&pixel.0[..3], &original.get_pixel(x, y).0[..]);
    }
}

#[tokio::test]
async fn url_mode_rejects_error_status() {
    let addr = serve_fixed("404 Not Found", b"gone".to_vec()).await;
    let mut remover = url_remover(16);

    let err = remover
        .process_url(&format!("http://{addr}/x.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, BgRemovalError::Network(_)), "{err:?}");
}

#[tokio::test]
async fn single_pixel_image_round_trips() {
    let mut remover = mock_remover(16);
    let (original, transparent) = remover
        .process_upload(ImageSource::Image(RgbImage::from_pixel(1, 1, Rgb([9, 9, 9])).into()))
        .await
        .unwrap();
    assert_eq!(original.dimensions(), (1, 1));
    assert_eq!(transparent.dimensions(), (1, 1));
}

#[tokio::test]
async fn file_mode_writes_png_with_alpha() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("butterfly.jpg");
    gradient(96, 64)
        .save_with_format(&input, ImageFormat::Jpeg)
        .unwrap();

    let mut remover = mock_remover(32);
    let written = remover.process_file(&input, None).await.unwrap();

    assert_eq!(written, temp.path().join("butterfly.png"));
    assert!(written.exists());
    let decoded = image::open(&written).unwrap();
    assert!(decoded.color().has_alpha());
    assert_eq!((decoded.width(), decoded.height()), (96, 64));
}

#[tokio::test]
async fn file_mode_overwrites_png_input() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("photo.png");
    gradient(20, 20).save_with_format(&input, ImageFormat::Png).unwrap();

    let mut remover = mock_remover(16);
    let written = remover.process_file(&input, None).await.unwrap();

    assert_eq!(written, input);
    assert!(image::open(&written).unwrap().color().has_alpha());
}

#[tokio::test]
async fn file_mode_honors_explicit_output() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("in.bmp");
    gradient(10, 12).save_with_format(&input, ImageFormat::Bmp).unwrap();
    let output = temp.path().join("out/result.png");

    let mut remover = mock_remover(16);
    let written = remover.process_file(&input, Some(&output)).await.unwrap();
    assert_eq!(written, output);
    assert!(!temp.path().join("in.png").exists());
}

#[tokio::test]
async fn model_is_loaded_once_across_requests() {
    let backend = MockBackend::with_size(16);
    let observer = backend.clone();
    let processor =
        BackgroundRemovalProcessor::with_backend(RemovalConfig::default(), Box::new(backend))
            .unwrap();
    let mut remover = BackgroundRemover::with_processor(processor).unwrap();

    for _ in 0..3 {
        remover
            .process_upload(ImageSource::Image(gradient(8, 8).into()))
            .await
            .unwrap();
    }

    let history = observer.get_call_history();
    assert_eq!(history.iter().filter(|c| *c == "initialize").count(), 1);
    assert_eq!(history.iter().filter(|c| *c == "infer").count(), 3);
}

/// Factory handing out mocks, to check the processor's factory seam
struct MockFactory;

impl BackendFactory for MockFactory {
    fn create_backend(&self, _backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(MockBackend::with_size(16)))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

#[test]
fn custom_factory_creates_backend_lazily() {
    let mut processor =
        BackgroundRemovalProcessor::with_factory(RemovalConfig::default(), Box::new(MockFactory))
            .unwrap();
    assert!(!processor.is_initialized());
    assert_eq!(processor.available_backends().len(), 2);

    let result = processor.process(&gradient(30, 30)).unwrap();
    assert!(processor.is_initialized());
    assert_eq!(result.mask.dimensions(), (30, 30));
    assert_eq!(processor.model_info().unwrap().name, "mock-birefnet");
}

/// Counts pixels that are at least half opaque
struct OpaqueCount;

impl OutputStrategy for OpaqueCount {
    type Output = usize;

    fn emit(&self, result: RemovalResult) -> Result<usize> {
        Ok(result.transparent.pixels().filter(|p| p[3] >= 128).count())
    }
}

#[tokio::test]
async fn custom_output_strategy() {
    let mut remover = mock_remover(32);
    let count = remover
        .process(ImageSource::Image(gradient(60, 60).into()), &OpaqueCount)
        .await
        .unwrap();
    // Mock foreground is a disc of radius 20 on a 60x60 image
    assert!(count > 900 && count < 1700, "{count}");
}

#[test]
fn output_path_derivation() {
    assert_eq!(
        birefnet_bgremove::derive_output_path(Path::new("dir/butterfly.jpg")),
        Path::new("dir/butterfly.png")
    );
}
