//! Image Pipeline (C8, §4.8).
//!
//! Produces five WebP variants per source photo, computes a dominant color,
//! and writes a `metadata.json` sidecar. Decode/resize/encode is CPU-bound
//! and runs on a blocking thread.

use crate::photo::fetcher::PhotoPart;
use futures::future::join_all;
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum ImageError {
	#[error("image decode error: {0}")]
	Decode(#[from] image::ImageError),
	#[error("webp encode error: {0}")]
	Encode(String),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("serialization error: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("blocking task panicked: {0}")]
	Join(#[from] tokio::task::JoinError),
}

#[derive(Clone, Copy)]
struct VariantSpec {
	name: &'static str,
	max_width: Option<u32>,
	quality: f32,
}

const VARIANTS: [VariantSpec; 5] = [
	VariantSpec { name: "original", max_width: None, quality: 90.0 },
	VariantSpec { name: "large", max_width: Some(1920), quality: 85.0 },
	VariantSpec { name: "medium", max_width: Some(1280), quality: 80.0 },
	VariantSpec { name: "small", max_width: Some(800), quality: 75.0 },
	VariantSpec { name: "thumb", max_width: Some(400), quality: 70.0 },
];

#[derive(Debug, Clone, Serialize)]
pub struct VariantOutput {
	pub name: String,
	pub path: PathBuf,
	pub width: u32,
	pub height: u32,
	pub byte_size: u64,
	pub format: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoMetadata {
	pub object_id: String,
	pub dominant_color_rgb: [u8; 3],
	pub variants: Vec<VariantOutput>,
	pub source_headers: HashMap<String, String>,
}

/// `RE_1` -> `Residential`, `MF_4` -> `MultiFamily`, `CI_3` -> `Commercial`,
/// `LD_2` -> `Land`; unrecognized class names pass through unchanged.
pub fn class_long_name(class_name: &str) -> String {
	match class_name {
		"RE_1" => "Residential".to_string(),
		"MF_4" => "MultiFamily".to_string(),
		"CI_3" => "Commercial".to_string(),
		"LD_2" => "Land".to_string(),
		other => other.to_string(),
	}
}

fn decode_with_jpeg_fallback(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
	match image::load_from_memory(bytes) {
		Ok(img) => Ok(img),
		Err(_) => {
			let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)?;
			Ok(decoded)
		}
	}
}

fn dominant_color(image: &DynamicImage) -> [u8; 3] {
	let rgb = image.to_rgb8();
	let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
	let count = rgb.pixels().len() as u64;
	if count == 0 {
		return [0, 0, 0];
	}
	for pixel in rgb.pixels() {
		r += pixel.0[0] as u64;
		g += pixel.0[1] as u64;
		b += pixel.0[2] as u64;
	}
	[(r / count) as u8, (g / count) as u8, (b / count) as u8]
}

/// Resize never enlarges; aspect is preserved with height derived from width.
fn resize_for_variant(image: &DynamicImage, max_width: Option<u32>) -> DynamicImage {
	let Some(max_width) = max_width else { return image.clone() };
	let (width, height) = image.dimensions();
	if width <= max_width {
		return image.clone();
	}
	let new_height = ((height as u64 * max_width as u64) / width as u64) as u32;
	image.resize(max_width, new_height.max(1), image::imageops::FilterType::Lanczos3)
}

fn encode_webp(image: &DynamicImage, quality: f32) -> Result<Vec<u8>, ImageError> {
	let encoder = webp::Encoder::from_image(image).map_err(|e| ImageError::Encode(e.to_string()))?;
	Ok(encoder.encode(quality).to_vec())
}

struct DecodedVariant {
	name: &'static str,
	bytes: Vec<u8>,
	width: u32,
	height: u32,
}

fn build_variant_blocking(source: &DynamicImage, spec: VariantSpec) -> Result<DecodedVariant, ImageError> {
	let resized = resize_for_variant(source, spec.max_width);
	let (width, height) = resized.dimensions();
	let encoded = encode_webp(&resized, spec.quality)?;
	Ok(DecodedVariant {
		name: spec.name,
		bytes: encoded,
		width,
		height,
	})
}

/// Process one source photo into five WebP variants under
/// `cache/Photos/<ClassLongName>/<listingId>/`, writing a `metadata.json`
/// sidecar (§4.8).
#[instrument(skip(cache_dir, part))]
pub async fn process_photo(
	cache_dir: &Path,
	class_name: &str,
	listing_id: &str,
	part: &PhotoPart,
) -> Result<PhotoMetadata, ImageError> {
	let out_dir = cache_dir.join(class_long_name(class_name)).join(listing_id);
	tokio::fs::create_dir_all(&out_dir).await?;

	let bytes = part.body.to_vec();
	let source = Arc::new(tokio::task::spawn_blocking(move || decode_with_jpeg_fallback(&bytes)).await??);

	let dominant_color_rgb = {
		let source = source.clone();
		tokio::task::spawn_blocking(move || dominant_color(&source)).await?
	};

	// Variants within one listing's photo are produced in parallel (§5): each
	// resize/encode is its own blocking task over the shared decoded source.
	let variant_futures = VARIANTS.iter().map(|&spec| {
		let source = source.clone();
		async move { tokio::task::spawn_blocking(move || build_variant_blocking(&source, spec)).await? }
	});
	let decoded: Vec<DecodedVariant> = join_all(variant_futures).await.into_iter().collect::<Result<_, ImageError>>()?;

	let mut variant_outputs = Vec::with_capacity(decoded.len());
	for variant in decoded {
		let file_name = format!("{}-{}.webp", variant.name, part.object_id);
		let path = out_dir.join(&file_name);
		tokio::fs::write(&path, &variant.bytes).await?;
		variant_outputs.push(VariantOutput {
			name: variant.name.to_string(),
			byte_size: variant.bytes.len() as u64,
			width: variant.width,
			height: variant.height,
			format: "webp".to_string(),
			path,
		});
	}

	let mut source_headers = part.extra_headers.clone();
	if let Some(v) = &part.last_modified {
		source_headers.insert("Last-Modified".to_string(), v.clone());
	}
	if let Some(v) = &part.content_sub_description {
		source_headers.insert("Content-Sub-Description".to_string(), v.clone());
	}
	if let Some(v) = &part.content_label {
		source_headers.insert("Content-Label".to_string(), v.clone());
	}
	if let Some(v) = &part.accessibility {
		source_headers.insert("Accessibility".to_string(), v.clone());
	}
	if let Some(v) = &part.photo_timestamp {
		source_headers.insert("Photo-Timestamp".to_string(), v.clone());
	}

	let metadata = PhotoMetadata {
		object_id: part.object_id.clone(),
		dominant_color_rgb,
		variants: variant_outputs,
		source_headers,
	};

	let sidecar_path = out_dir.join("metadata.json");
	tokio::fs::write(&sidecar_path, serde_json::to_vec_pretty(&metadata)?).await?;

	Ok(metadata)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_known_class_codes() {
		assert_eq!(class_long_name("RE_1"), "Residential");
		assert_eq!(class_long_name("MF_4"), "MultiFamily");
		assert_eq!(class_long_name("CI_3"), "Commercial");
		assert_eq!(class_long_name("LD_2"), "Land");
	}

	#[test]
	fn unknown_class_passes_through() {
		assert_eq!(class_long_name("XX_9"), "XX_9");
	}

	#[test]
	fn resize_never_enlarges() {
		let image = DynamicImage::new_rgb8(100, 50);
		let resized = resize_for_variant(&image, Some(400));
		assert_eq!(resized.dimensions(), (100, 50));
	}

	#[test]
	fn resize_shrinks_preserving_aspect() {
		let image = DynamicImage::new_rgb8(2000, 1000);
		let resized = resize_for_variant(&image, Some(1000));
		assert_eq!(resized.dimensions(), (1000, 500));
	}

	#[test]
	fn dominant_color_of_solid_image_is_exact() {
		let mut image = image::RgbImage::new(4, 4);
		for pixel in image.pixels_mut() {
			*pixel = image::Rgb([10, 20, 30]);
		}
		let dynamic = DynamicImage::ImageRgb8(image);
		assert_eq!(dominant_color(&dynamic), [10, 20, 30]);
	}
}
