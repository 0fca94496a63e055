// src/services/thumbnails.rs
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::{FfmpegConfig, StorageConfig};
use crate::db::models::ThumbnailKind;
use crate::error::{AppError, AppResult};

pub const THUMBNAIL_FIELD: &str = "thumbnailfile";
pub const PREVIEW_FIELD: &str = "previewfile";

const MINIATURE_SIZE: (u32, u32) = (280, 157);
const PREVIEW_SIZE: (u32, u32) = (850, 480);

/// Image part received with an update request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub field: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub kind: ThumbnailKind,
    pub filename: String,
    pub path: PathBuf,
}

/// Zero, one or both of the images a video displays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedThumbnails {
    pub miniature: Option<PreparedImage>,
    pub preview: Option<PreparedImage>,
}

impl PreparedThumbnails {
    pub fn iter(&self) -> impl Iterator<Item = &PreparedImage> {
        self.miniature.iter().chain(self.preview.iter())
    }

    /// Removes processed files that will not be attached to a video.
    pub async fn discard(&self) {
        for image in self.iter() {
            if let Err(e) = fs::remove_file(&image.path).await {
                log::warn!("Failed to remove thumbnail {}: {}", image.path.display(), e);
            }
        }
    }
}

pub fn image_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/jpg" | "image/jpeg" => Some(".jpg"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailBuilder {
    tmp_dir: PathBuf,
    output_dir: PathBuf,
    max_size: usize,
    ffmpeg: FfmpegConfig,
}

impl ThumbnailBuilder {
    pub fn new(storage: &StorageConfig, ffmpeg: &FfmpegConfig) -> Self {
        Self {
            tmp_dir: PathBuf::from(&storage.tmp_path),
            output_dir: PathBuf::from(&storage.thumbnails_path),
            max_size: storage.max_image_size,
            ffmpeg: ffmpeg.clone(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Deletes stored images that no video references anymore.
    pub async fn remove_stored(&self, filenames: &[String]) {
        for filename in filenames {
            let path = self.output_dir.join(filename);
            match fs::remove_file(&path).await {
                Ok(()) => log::debug!("Removed replaced image {}", path.display()),
                Err(e) => log::warn!("Failed to remove replaced image {}: {}", path.display(), e),
            }
        }
    }

    pub fn validate(&self, image: &UploadedImage) -> AppResult<&'static str> {
        let mime = image.content_type.as_deref().unwrap_or("application/octet-stream");
        let extension =
            image_extension(mime).ok_or_else(|| AppError::UnsupportedMediaType(mime.to_string()))?;

        if image.data.len() > self.max_size {
            return Err(AppError::PayloadTooLarge {
                size: image.data.len(),
                max: self.max_size,
            });
        }

        Ok(extension)
    }

    /// Validates and stores the uploaded images. Runs before the update
    /// transaction opens so no lock is held during file I/O.
    pub async fn build(&self, images: Vec<UploadedImage>) -> AppResult<PreparedThumbnails> {
        let mut prepared = PreparedThumbnails::default();

        for image in images {
            let kind = match image.field.as_str() {
                THUMBNAIL_FIELD => ThumbnailKind::Miniature,
                PREVIEW_FIELD => ThumbnailKind::Preview,
                other => {
                    log::debug!("Ignoring unexpected image field {}", other);
                    continue;
                }
            };

            let processed = match self.process(kind, &image).await {
                Ok(processed) => processed,
                Err(e) => {
                    prepared.discard().await;
                    return Err(e);
                }
            };

            let slot = match kind {
                ThumbnailKind::Miniature => &mut prepared.miniature,
                ThumbnailKind::Preview => &mut prepared.preview,
            };
            if let Some(replaced) = slot.replace(processed) {
                let _ = fs::remove_file(&replaced.path).await;
            }
        }

        Ok(prepared)
    }

    async fn process(&self, kind: ThumbnailKind, image: &UploadedImage) -> AppResult<PreparedImage> {
        let extension = self.validate(image)?;

        fs::create_dir_all(&self.tmp_dir).await?;
        fs::create_dir_all(&self.output_dir).await?;

        let name = Uuid::new_v4();
        let tmp_path = self.tmp_dir.join(format!("{}{}", name, extension));
        fs::write(&tmp_path, &image.data).await?;

        let result = if self.ffmpeg.enabled {
            let filename = format!("{}.jpg", name);
            let output = self.output_dir.join(&filename);
            self.resize(&tmp_path, &output, kind)
                .await
                .map(|_| (filename, output))
        } else {
            let filename = format!("{}{}", name, extension);
            let output = self.output_dir.join(&filename);
            fs::copy(&tmp_path, &output)
                .await
                .map(|_| (filename, output))
                .map_err(AppError::from)
        };

        if let Err(e) = fs::remove_file(&tmp_path).await {
            log::warn!("Failed to remove temporary upload {}: {}", tmp_path.display(), e);
        }

        let (filename, path) = result?;
        log::debug!("Stored {:?} image {}", kind, path.display());

        Ok(PreparedImage {
            kind,
            filename,
            path,
        })
    }

    async fn resize(&self, input: &Path, output: &Path, kind: ThumbnailKind) -> AppResult<()> {
        let (width, height) = match kind {
            ThumbnailKind::Miniature => MINIATURE_SIZE,
            ThumbnailKind::Preview => PREVIEW_SIZE,
        };

        let status = Command::new(&self.ffmpeg.binary)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-threads")
            .arg(self.ffmpeg.thread_count.to_string())
            .arg("-vf")
            .arg(format!("scale={}:{}", width, height))
            .arg(output)
            .status()
            .await?;

        if !status.success() {
            return Err(AppError::Other(anyhow::anyhow!(
                "ffmpeg failed to resize {}",
                input.display()
            )));
        }

        Ok(())
    }
}
