//! Torrent metadata embedded alongside each video file.
//!
//! Renaming a video changes the `info.name` of every torrent, which changes
//! the info hash, so each file gets a freshly named torrent and a new hash.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use sha1::{Digest, Sha1};
use tokio::fs;
use uuid::Uuid;

use crate::db::models::{Video, VideoFile};
use crate::error::{AppError, AppResult};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Bencode {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Bencode>),
    Dict(BTreeMap<Vec<u8>, Bencode>),
}

impl Bencode {
    pub fn decode(input: &[u8]) -> AppResult<Bencode> {
        let mut parser = Parser { input, pos: 0 };
        let value = parser.value(0)?;
        if parser.pos != input.len() {
            return Err(AppError::Torrent(format!(
                "trailing data at offset {}",
                parser.pos
            )));
        }
        Ok(value)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Bencode::Int(i) => {
                out.push(b'i');
                out.extend_from_slice(i.to_string().as_bytes());
                out.push(b'e');
            }
            Bencode::Bytes(bytes) => encode_bytes(bytes, out),
            Bencode::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            // BTreeMap iterates in key order, which bencode requires.
            Bencode::Dict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    encode_bytes(key, out);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Bencode> {
        match self {
            Bencode::Dict(entries) => entries.get(key.as_bytes()),
            _ => None,
        }
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Bencode> {
        match self {
            Bencode::Dict(entries) => entries.get_mut(key.as_bytes()),
            _ => None,
        }
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> AppError {
        AppError::Torrent(format!("{} at offset {}", message, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn value(&mut self, depth: usize) -> AppResult<Bencode> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }

        match self.peek() {
            Some(b'i') => {
                self.pos += 1;
                let digits = self.until(b'e')?;
                let value = std::str::from_utf8(digits)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| self.error("invalid integer"))?;
                Ok(Bencode::Int(value))
            }
            Some(b'l') => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek() != Some(b'e') {
                    if self.peek().is_none() {
                        return Err(self.error("unterminated list"));
                    }
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Bencode::List(items))
            }
            Some(b'd') => {
                self.pos += 1;
                let mut entries = BTreeMap::new();
                while self.peek() != Some(b'e') {
                    if self.peek().is_none() {
                        return Err(self.error("unterminated dictionary"));
                    }
                    let key = self.bytes()?;
                    let value = self.value(depth + 1)?;
                    entries.insert(key, value);
                }
                self.pos += 1;
                Ok(Bencode::Dict(entries))
            }
            Some(b'0'..=b'9') => Ok(Bencode::Bytes(self.bytes()?)),
            Some(_) => Err(self.error("unexpected byte")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn bytes(&mut self) -> AppResult<Vec<u8>> {
        let digits = self.until(b':')?;
        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| self.error("invalid string length"))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| self.error("string exceeds input"))?;
        let bytes = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    /// Returns the bytes up to `delimiter` and moves past it.
    fn until(&mut self, delimiter: u8) -> AppResult<&'a [u8]> {
        let start = self.pos;
        let offset = self.input[start..]
            .iter()
            .position(|b| *b == delimiter)
            .ok_or_else(|| self.error("missing delimiter"))?;
        self.pos = start + offset + 1;
        Ok(&self.input[start..start + offset])
    }
}

pub fn info_name(video: &Video, file: &VideoFile) -> String {
    format!("{} {}p", video.name, file.resolution)
}

pub fn torrent_filename(resolution: i32, streaming: bool) -> String {
    if streaming {
        format!("{}-{}-hls.torrent", Uuid::new_v4(), resolution)
    } else {
        format!("{}-{}.torrent", Uuid::new_v4(), resolution)
    }
}

pub fn info_hash(info: &Bencode) -> String {
    hex::encode(Sha1::digest(info.encode()))
}

#[derive(Debug, Clone)]
pub struct TorrentRegenerator {
    dir: PathBuf,
}

impl TorrentRegenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Rewrites the torrent of `file` for the current video name. Files
    /// without a torrent are skipped.
    pub async fn regenerate(
        &self,
        video: &Video,
        file: &VideoFile,
        streaming: bool,
    ) -> AppResult<Option<VideoFile>> {
        let Some(old_filename) = &file.torrent_filename else {
            return Ok(None);
        };

        let old_path = self.dir.join(old_filename);
        let mut torrent = Bencode::decode(&fs::read(&old_path).await?)?;

        let info = torrent
            .get_mut("info")
            .ok_or_else(|| AppError::Torrent(format!("{} has no info dictionary", old_filename)))?;
        let Bencode::Dict(entries) = &mut *info else {
            return Err(AppError::Torrent(format!(
                "{} info is not a dictionary",
                old_filename
            )));
        };
        entries.insert(
            b"name".to_vec(),
            Bencode::Bytes(info_name(video, file).into_bytes()),
        );
        let hash = info_hash(info);

        let new_filename = torrent_filename(file.resolution, streaming);
        fs::write(self.dir.join(&new_filename), torrent.encode()).await?;

        if let Err(e) = fs::remove_file(&old_path).await {
            log::warn!("Failed to remove old torrent {}: {}", old_path.display(), e);
        }

        Ok(Some(VideoFile {
            torrent_filename: Some(new_filename),
            info_hash: Some(hash),
            updated_at: Utc::now(),
            ..file.clone()
        }))
    }
}
