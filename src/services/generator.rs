//! Boundary to the image-to-3D model.
//!
//! The worker only talks to [`GenerationAdapter`]. Two implementations ship
//! with the service: [`LocalGenerator`], a self-contained placeholder, and
//! [`RemoteGenerator`], which forwards mesh generation to an inference server.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::{ImageFormat, Rgba, RgbaImage};
use reqwest::Client;
use serde::Deserialize;

use crate::services::storage::{ObjectStore, StorageError};

/// MIME type of binary glTF.
pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";

/// A generated model ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub data: Vec<u8>,
    pub content_type: &'static str,
}

impl Mesh {
    pub fn glb(data: Vec<u8>) -> Self {
        Self {
            data,
            content_type: GLB_CONTENT_TYPE,
        }
    }
}

#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Return the image with its background made transparent, PNG-encoded.
    async fn remove_background(&self, image: Vec<u8>) -> Result<Vec<u8>, GenerationError>;

    async fn generate_mesh(&self, prompt: &str, images: Vec<Vec<u8>>) -> Result<Mesh, GenerationError>;

    async fn save(&self, mesh: &Mesh, store: &dyn ObjectStore, key: &str) -> Result<(), GenerationError> {
        store.upload(key, &mesh.data, mesh.content_type).await?;
        Ok(())
    }
}

/// Per-channel distance under which a pixel counts as background.
const BACKGROUND_TOLERANCE: i32 = 24;

/// Placeholder model that runs entirely in-process.
///
/// Background removal keys out the border colour; mesh generation emits a
/// single-triangle GLB tagged with the prompt.
#[derive(Debug, Default, Clone)]
pub struct LocalGenerator;

impl LocalGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GenerationAdapter for LocalGenerator {
    fn name(&self) -> &str {
        "local"
    }

    async fn remove_background(&self, image: Vec<u8>) -> Result<Vec<u8>, GenerationError> {
        tokio::task::spawn_blocking(move || key_out_background(&image)).await?
    }

    async fn generate_mesh(&self, prompt: &str, images: Vec<Vec<u8>>) -> Result<Mesh, GenerationError> {
        if images.is_empty() {
            return Err(GenerationError::NoInput);
        }
        let prompt = prompt.to_string();
        let data =
            tokio::task::spawn_blocking(move || placeholder_glb(&prompt, images.len())).await??;
        Ok(Mesh::glb(data))
    }
}

/// Make every pixel close to the averaged corner colour transparent.
fn key_out_background(bytes: &[u8]) -> Result<Vec<u8>, GenerationError> {
    let mut img: RgbaImage = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(GenerationError::InvalidImage("image has no pixels".to_string()));
    }

    let corners = [
        *img.get_pixel(0, 0),
        *img.get_pixel(width - 1, 0),
        *img.get_pixel(0, height - 1),
        *img.get_pixel(width - 1, height - 1),
    ];
    let mut background = [0i32; 3];
    for corner in &corners {
        for (sum, channel) in background.iter_mut().zip(corner.0.iter()) {
            *sum += i32::from(*channel);
        }
    }
    let background = background.map(|sum| sum / corners.len() as i32);

    for pixel in img.pixels_mut() {
        let Rgba([r, g, b, _]) = *pixel;
        let close = [r, g, b]
            .iter()
            .zip(background.iter())
            .all(|(channel, bg)| (i32::from(*channel) - bg).abs() <= BACKGROUND_TOLERANCE);
        if close {
            pixel.0[3] = 0;
        }
    }

    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// Build a minimal glTF 2.0 binary holding one triangle.
fn placeholder_glb(prompt: &str, source_images: usize) -> Result<Vec<u8>, GenerationError> {
    let vertices: [f32; 9] = [-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];

    let mut bin = Vec::with_capacity(44);
    for v in vertices {
        bin.extend_from_slice(&v.to_le_bytes());
    }
    for i in indices {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    pad_to_four(&mut bin, 0);

    let document = serde_json::json!({
        "asset": {
            "version": "2.0",
            "generator": concat!("meshgen-api ", env!("CARGO_PKG_VERSION")),
            "extras": { "prompt": prompt, "source_images": source_images }
        },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }],
        "accessors": [
            {
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "max": [1.0, 1.0, 0.0], "min": [-1.0, 0.0, 0.0]
            },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR", "max": [2], "min": [0] }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
        ],
        "buffers": [{ "byteLength": bin.len() }]
    });
    let mut json = serde_json::to_vec(&document)?;
    pad_to_four(&mut json, b' ');

    // 12-byte header, then two chunks each with an 8-byte header
    let total = 12 + 8 + json.len() + 8 + bin.len();
    let mut glb = Vec::with_capacity(total);
    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total as u32).to_le_bytes());
    glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
    glb.extend_from_slice(b"JSON");
    glb.extend_from_slice(&json);
    glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    glb.extend_from_slice(b"BIN\0");
    glb.extend_from_slice(&bin);
    Ok(glb)
}

fn pad_to_four(buf: &mut Vec<u8>, fill: u8) {
    let padded = (buf.len() + 3) & !3;
    buf.resize(padded, fill);
}

/// Client for an external inference server.
///
/// Speaks `POST {base_url}/generate` with `{"image": <base64>, "prompt": ...}`
/// and expects `{"glb_base64": ...}` back. The server takes a single image,
/// so only the first processed input is sent. Background removal stays local.
pub struct RemoteGenerator {
    http: Client,
    base_url: String,
    local: LocalGenerator,
}

#[derive(Deserialize)]
struct RemoteResponse {
    #[serde(default)]
    glb_base64: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RemoteGenerator {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, GenerationError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            local: LocalGenerator::new(),
        })
    }
}

#[async_trait]
impl GenerationAdapter for RemoteGenerator {
    fn name(&self) -> &str {
        "remote"
    }

    async fn remove_background(&self, image: Vec<u8>) -> Result<Vec<u8>, GenerationError> {
        self.local.remove_background(image).await
    }

    async fn generate_mesh(&self, prompt: &str, images: Vec<Vec<u8>>) -> Result<Mesh, GenerationError> {
        let first = images.first().ok_or(GenerationError::NoInput)?;
        if images.len() > 1 {
            tracing::debug!(
                ignored = images.len() - 1,
                "Remote generator accepts one image, sending the first"
            );
        }

        let engine = base64::engine::general_purpose::STANDARD;
        let body = serde_json::json!({
            "image": engine.encode(first),
            "prompt": prompt,
        });

        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let payload: RemoteResponse = response.json().await?;

        if !status.is_success() {
            return Err(GenerationError::Remote {
                status: status.as_u16(),
                message: payload.error.unwrap_or_else(|| "no error message".to_string()),
            });
        }

        let encoded = payload.glb_base64.ok_or_else(|| GenerationError::Remote {
            status: status.as_u16(),
            message: payload
                .error
                .unwrap_or_else(|| "response carried no model".to_string()),
        })?;
        let data = engine
            .decode(encoded)
            .map_err(|e| GenerationError::InvalidOutput(e.to_string()))?;
        Ok(Mesh::glb(data))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("No input images to generate from")]
    NoInput,

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to encode model: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Generator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generator returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Generator returned an unreadable model: {0}")]
    InvalidOutput(String),

    #[error("Failed to store model: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn red_square_on_white() -> Vec<u8> {
        let img: RgbaImage = ImageBuffer::from_fn(32, 32, |x, y| {
            if (8..24).contains(&x) && (8..24).contains(&y) {
                Rgba([200, 20, 20, 255])
            } else {
                Rgba([250, 250, 250, 255])
            }
        });
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    #[tokio::test]
    async fn test_background_becomes_transparent() {
        let processed = LocalGenerator::new()
            .remove_background(red_square_on_white())
            .await
            .unwrap();

        let img = image::load_from_memory(&processed).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (32, 32));
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
        assert_eq!(img.get_pixel(31, 31).0[3], 0);
        assert_eq!(img.get_pixel(16, 16).0, [200, 20, 20, 255]);
    }

    #[tokio::test]
    async fn test_rejects_non_image_bytes() {
        let err = LocalGenerator::new()
            .remove_background(b"not an image".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Image(_)));
    }

    #[tokio::test]
    async fn test_placeholder_glb_layout() {
        let mesh = LocalGenerator::new()
            .generate_mesh("a red chair", vec![red_square_on_white()])
            .await
            .unwrap();
        assert_eq!(mesh.content_type, GLB_CONTENT_TYPE);

        let data = &mesh.data;
        assert_eq!(&data[0..4], b"glTF");
        assert_eq!(u32::from_le_bytes(data[4..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize, data.len());
        assert_eq!(data.len() % 4, 0);

        let json_len = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
        assert_eq!(&data[16..20], b"JSON");
        let document: serde_json::Value = serde_json::from_slice(&data[20..20 + json_len]).unwrap();
        assert_eq!(document["asset"]["version"], "2.0");
        assert_eq!(document["asset"]["extras"]["prompt"], "a red chair");
        assert_eq!(document["buffers"][0]["byteLength"], 44);
    }

    #[tokio::test]
    async fn test_mesh_needs_an_image() {
        let err = LocalGenerator::new().generate_mesh("x", vec![]).await.unwrap_err();
        assert!(matches!(err, GenerationError::NoInput));
    }
}
