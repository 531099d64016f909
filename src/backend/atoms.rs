//! Movie box surgery for the parts of an MP4 that `mp4ameta` does not own
//!
//! `mp4ameta` only rewrites `moov/udta/meta/ilst`. Phones and muxers also
//! leave identifying data in:
//!
//! - QuickTime user-data text atoms (`moov/udta/©mak`, `trak/udta/©swr`, ...)
//! - `meta` boxes with `mdta` keys (`com.apple.quicktime.make`, ...), either
//!   directly in `moov` (phones) or in `moov/udta` (ffmpeg `use_metadata_tags`)
//! - the `mvhd`/`tkhd`/`mdhd` creation and modification times
//!
//! [`MovieEdit`] rebuilds `moov` without those atoms and with new timestamps,
//! then shifts `stco`/`co64` chunk offsets when `moov` sits before the media
//! data and changed size.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

use crate::error::{MetadataError, Result};
use crate::fields::CreationDate;

/// Seconds from 1904-01-01 (QuickTime epoch) to 1970-01-01
const QUICKTIME_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Text atoms that name a device, app or date
const DEVICE_TEXT_ATOMS: &[&[u8; 4]] = &[
    b"\xa9mak", b"\xa9mod", b"\xa9swr", b"\xa9too", b"\xa9enc", b"\xa9day",
];

/// Boxes descended into when rebuilding
const CONTAINERS: &[&[u8; 4]] = &[b"trak", b"mdia", b"minf", b"stbl", b"udta"];

/// Which `udta` text atoms to remove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextAtoms {
    /// `©mak`, `©mod`, `©swr`, `©too`, `©enc`, `©day`
    Device,
    /// Every `©xxx` atom plus `XMP_`
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timestamps {
    Keep,
    Set(CreationDate),
    /// Zero, which demuxers treat as unset
    Clear,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MovieEdit {
    pub text_atoms: TextAtoms,
    pub drop_keys: bool,
    pub timestamps: Timestamps,
}

impl MovieEdit {
    /// Remove stale device atoms and keys, optionally re-dating the movie
    pub fn retag(date: Option<CreationDate>) -> Self {
        Self {
            text_atoms: TextAtoms::Device,
            drop_keys: true,
            timestamps: date.map_or(Timestamps::Keep, Timestamps::Set),
        }
    }

    /// Remove every text atom, the keys box and the timestamps
    pub fn strip() -> Self {
        Self {
            text_atoms: TextAtoms::All,
            drop_keys: true,
            timestamps: Timestamps::Clear,
        }
    }

    fn drops(&self, parent: &[u8; 4], kind: &[u8; 4], body: &[u8]) -> bool {
        match parent {
            b"moov" => self.drop_keys && kind == b"meta",
            b"udta" if kind == b"meta" => self.drop_keys && is_keys_meta(body),
            b"udta" => match self.text_atoms {
                TextAtoms::Device => DEVICE_TEXT_ATOMS.contains(&kind),
                TextAtoms::All => kind[0] == 0xa9 || kind == b"XMP_",
            },
            _ => false,
        }
    }

    fn quicktime_seconds(&self) -> Option<u64> {
        match self.timestamps {
            Timestamps::Keep => None,
            Timestamps::Clear => Some(0),
            Timestamps::Set(date) => {
                Some((date.datetime().timestamp() + QUICKTIME_EPOCH_OFFSET).max(0) as u64)
            }
        }
    }

    /// Rewrite the file at `path` in place; returns whether anything changed
    pub fn apply_to_file(&self, path: &Path) -> Result<bool> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let boxes = top_level_boxes(&mut file, len)?;

        let moov = boxes
            .iter()
            .find(|b| &b.kind == b"moov")
            .copied()
            .ok_or_else(|| malformed("no moov box"))?;

        let mut old = vec![0u8; moov.size as usize];
        file.seek(SeekFrom::Start(moov.offset))?;
        file.read_exact(&mut old)?;

        let mut new = self.rebuild_moov(&old)?;
        if new == old {
            return Ok(false);
        }

        let delta = new.len() as i64 - old.len() as i64;
        let media_after_moov = boxes
            .iter()
            .any(|b| &b.kind == b"mdat" && b.offset > moov.offset);
        if delta != 0 && media_after_moov {
            let header = header_at(&new, 0)?;
            shift_chunk_offsets(&mut new[header.header_len..], moov.offset, delta)?;
        }
        debug!("moov rebuilt: {} -> {} bytes", old.len(), new.len());

        // Same directory as the staged file, so the rename stays on one filesystem
        let rewritten = path.with_extension("moov-rewrite");
        {
            let mut out = BufWriter::new(File::create(&rewritten)?);
            for b in &boxes {
                if b.offset == moov.offset {
                    out.write_all(&new)?;
                } else {
                    file.seek(SeekFrom::Start(b.offset))?;
                    let copied = io::copy(&mut (&mut file).take(b.size), &mut out)?;
                    if copied != b.size {
                        return Err(malformed("truncated top-level box"));
                    }
                }
            }
            out.flush()?;
        }
        drop(file);
        std::fs::rename(&rewritten, path)?;
        Ok(true)
    }

    fn rebuild_moov(&self, moov: &[u8]) -> Result<Vec<u8>> {
        let header = header_at(moov, 0)?;
        let body = self.rebuild(&moov[header.header_len..header.size], b"moov")?;
        Ok(boxed(b"moov", &body))
    }

    fn rebuild(&self, body: &[u8], parent: &[u8; 4]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(body.len());
        let mut pos = 0;

        while pos < body.len() {
            let header = header_at(body, pos)?;
            let raw = &body[pos..pos + header.size];
            pos += header.size;

            if self.drops(parent, &header.kind, &raw[header.header_len..]) {
                debug!("Dropping {}/{}", fourcc(parent), fourcc(&header.kind));
                continue;
            }

            match &header.kind {
                kind if CONTAINERS.contains(&kind) => {
                    let inner = self.rebuild(&raw[header.header_len..], kind)?;
                    out.extend_from_slice(&boxed(kind, &inner));
                }
                b"mvhd" | b"tkhd" | b"mdhd" => {
                    let mut patched = raw.to_vec();
                    if let Some(seconds) = self.quicktime_seconds() {
                        set_times(&mut patched[header.header_len..], seconds)?;
                    }
                    out.extend_from_slice(&patched);
                }
                _ => out.extend_from_slice(raw),
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
struct TopBox {
    kind: [u8; 4],
    offset: u64,
    size: u64,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    kind: [u8; 4],
    header_len: usize,
    size: usize,
}

/// `meta` holding QuickTime `mdta` keys rather than an iTunes `mdir` list
fn is_keys_meta(body: &[u8]) -> bool {
    let head = &body[..body.len().min(64)];
    head.windows(4)
        .position(|w| w == b"hdlr")
        .and_then(|at| head.get(at + 12..at + 16))
        .is_some_and(|handler| handler == b"mdta")
}

fn malformed(what: &str) -> MetadataError {
    MetadataError::ExternalToolFailure(format!("Malformed MP4: {}", what))
}

fn fourcc(kind: &[u8; 4]) -> String {
    kind.iter().map(|&b| if b == 0xa9 { '©' } else { b as char }).collect()
}

fn be_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| malformed("short read"))
}

fn be_u64(buf: &[u8], at: usize) -> Result<u64> {
    buf.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| malformed("short read"))
}

/// Box header inside an in-memory buffer
fn header_at(buf: &[u8], pos: usize) -> Result<Header> {
    let size32 = be_u32(buf, pos)?;
    let kind: [u8; 4] = buf
        .get(pos + 4..pos + 8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| malformed("short box header"))?;

    let (size, header_len) = match size32 {
        0 => ((buf.len() - pos) as u64, 8),
        1 => (be_u64(buf, pos + 8)?, 16),
        n => (n as u64, 8),
    };
    let size = usize::try_from(size).map_err(|_| malformed("box too large"))?;
    if size < header_len || pos + size > buf.len() {
        return Err(malformed(&format!("bad size for {}", fourcc(&kind))));
    }

    Ok(Header {
        kind,
        header_len,
        size,
    })
}

fn top_level_boxes(file: &mut File, len: u64) -> Result<Vec<TopBox>> {
    let mut boxes = Vec::new();
    let mut offset = 0u64;

    while offset + 8 <= len {
        let mut head = [0u8; 16];
        file.seek(SeekFrom::Start(offset))?;
        let available = (len - offset).min(16) as usize;
        file.read_exact(&mut head[..available])?;

        let kind: [u8; 4] = [head[4], head[5], head[6], head[7]];
        let size = match u32::from_be_bytes([head[0], head[1], head[2], head[3]]) {
            0 => len - offset,
            1 if available == 16 => u64::from_be_bytes([
                head[8], head[9], head[10], head[11], head[12], head[13], head[14], head[15],
            ]),
            1 => return Err(malformed("short largesize header")),
            n => n as u64,
        };
        if size < 8 || offset + size > len {
            return Err(malformed(&format!("bad size for top-level {}", fourcc(&kind))));
        }

        boxes.push(TopBox { kind, offset, size });
        offset += size;
    }

    Ok(boxes)
}

/// Box with a 32-bit size, or a 64-bit largesize when it does not fit
fn boxed(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    match u32::try_from(body.len() + 8) {
        Ok(size) => {
            out.extend_from_slice(&size.to_be_bytes());
            out.extend_from_slice(kind);
        }
        Err(_) => {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(kind);
            out.extend_from_slice(&(body.len() as u64 + 16).to_be_bytes());
        }
    }
    out.extend_from_slice(body);
    out
}

/// Creation and modification time of a `mvhd`/`tkhd`/`mdhd` body
fn set_times(body: &mut [u8], seconds: u64) -> Result<()> {
    let version = *body.first().ok_or_else(|| malformed("empty header box"))?;
    match version {
        0 => {
            let value = u32::try_from(seconds).unwrap_or(u32::MAX).to_be_bytes();
            let times = body.get_mut(4..12).ok_or_else(|| malformed("short v0 header box"))?;
            times[..4].copy_from_slice(&value);
            times[4..].copy_from_slice(&value);
        }
        1 => {
            let value = seconds.to_be_bytes();
            let times = body.get_mut(4..20).ok_or_else(|| malformed("short v1 header box"))?;
            times[..8].copy_from_slice(&value);
            times[8..].copy_from_slice(&value);
        }
        v => return Err(malformed(&format!("unknown header box version {}", v))),
    }
    Ok(())
}

/// Add `delta` to every chunk offset past `moov_offset`, in place
fn shift_chunk_offsets(body: &mut [u8], moov_offset: u64, delta: i64) -> Result<()> {
    let mut pos = 0;
    while pos < body.len() {
        let header = header_at(body, pos)?;
        let inner = &mut body[pos + header.header_len..pos + header.size];

        match &header.kind {
            b"trak" | b"mdia" | b"minf" | b"stbl" => shift_chunk_offsets(inner, moov_offset, delta)?,
            b"stco" => {
                let count = be_u32(inner, 4)? as usize;
                for i in 0..count {
                    let at = 8 + i * 4;
                    let offset = be_u32(inner, at)? as u64;
                    if offset > moov_offset {
                        let shifted = u32::try_from(offset as i64 + delta)
                            .map_err(|_| malformed("chunk offset overflow"))?;
                        inner[at..at + 4].copy_from_slice(&shifted.to_be_bytes());
                    }
                }
            }
            b"co64" => {
                let count = be_u32(inner, 4)? as usize;
                for i in 0..count {
                    let at = 8 + i * 8;
                    let offset = be_u64(inner, at)?;
                    if offset > moov_offset {
                        let shifted = (offset as i64 + delta) as u64;
                        inner[at..at + 8].copy_from_slice(&shifted.to_be_bytes());
                    }
                }
            }
            _ => {}
        }
        pos += header.size;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn media_offset(file: &[u8]) -> u64 {
        let at = file.windows(MEDIA.len()).position(|w| w == MEDIA).unwrap();
        at as u64
    }

    #[test]
    fn test_strip_removes_text_atoms_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "clip.mp4",
            &movie(&Movie {
                created: Some(CreationDate::parse("2019-01-01").unwrap()),
                with_track: true,
                udta: &[(b"\xa9mak", "Apple"), (b"\xa9mod", "iPhone 14 Pro"), (b"\xa9xyz", "+37.33-122.03/")],
                track_udta: &[(b"\xa9swr", "17.4")],
                keys: &[("com.apple.quicktime.make", "Apple")],
                ..Default::default()
            }),
        );

        assert!(MovieEdit::strip().apply_to_file(&path).unwrap());
        let out = std::fs::read(&path).unwrap();

        for needle in [&b"Apple"[..], &b"iPhone"[..], &b"17.4"[..], &b"+37.33"[..], &b"keys"[..], &b"mdta"[..]] {
            assert!(!contains(&out, needle), "{:?} left behind", String::from_utf8_lossy(needle));
        }
        assert!(header_times(&out).iter().all(|&t| t == 0));
        assert_eq!(chunk_offsets(&out), vec![media_offset(&out)]);
    }

    #[test]
    fn test_retag_sets_dates_and_keeps_other_atoms() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "clip.mov",
            &movie(&Movie {
                created: Some(CreationDate::parse("2019-01-01").unwrap()),
                with_track: true,
                udta: &[(b"\xa9mak", "Apple"), (b"\xa9xyz", "+37.33-122.03/")],
                ..Default::default()
            }),
        );

        let date = CreationDate::parse("2024-07-01 10:00:00").unwrap();
        assert!(MovieEdit::retag(Some(date)).apply_to_file(&path).unwrap());
        let out = std::fs::read(&path).unwrap();

        assert!(!contains(&out, b"Apple"));
        assert!(contains(&out, b"+37.33"));
        let expected = quicktime_seconds("2024-07-01 10:00:00");
        assert_eq!(header_times(&out), vec![expected; 3]);
        assert_eq!(chunk_offsets(&out), vec![media_offset(&out)]);
    }

    #[test]
    fn test_keys_meta_inside_udta() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "ffmpeg.mp4",
            &movie(&Movie {
                with_track: true,
                keys: &[("com.apple.quicktime.model", "iPhone 14 Pro")],
                keys_in_udta: true,
                ..Default::default()
            }),
        );

        assert!(MovieEdit::retag(None).apply_to_file(&path).unwrap());
        let out = std::fs::read(&path).unwrap();
        assert!(!contains(&out, b"iPhone"));
        assert!(!contains(&out, b"com.apple.quicktime"));
        assert_eq!(chunk_offsets(&out), vec![media_offset(&out)]);
    }

    #[test]
    fn test_itunes_meta_is_kept() {
        let mut hdlr = vec![0u8; 8];
        hdlr.extend_from_slice(b"mdir");
        hdlr.extend_from_slice(&[0u8; 13]);
        let mut body = vec![0u8; 4];
        body.extend(atom(b"hdlr", &hdlr));
        assert!(!is_keys_meta(&body));

        let keys = keys_meta(&[("com.apple.quicktime.make", "Apple")]);
        assert!(is_keys_meta(&keys[8..]));
    }

    #[test]
    fn test_unchanged_movie_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = movie(&Movie {
            with_track: true,
            ..Default::default()
        });
        let path = write(dir.path(), "clip.mp4", &bytes);

        assert!(!MovieEdit::retag(None).apply_to_file(&path).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_version_one_header_boxes() {
        let mut body = vec![1u8, 0, 0, 0];
        body.extend_from_slice(&[0xffu8; 16]);
        body.extend_from_slice(&[0u8; 12]);

        set_times(&mut body, 42).unwrap();
        assert_eq!(be_u64(&body, 4).unwrap(), 42);
        assert_eq!(be_u64(&body, 12).unwrap(), 42);
        assert_eq!(&body[20..], &[0u8; 12]);
    }

    #[test]
    fn test_truncated_moov_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = movie(&Movie::default());
        bytes.truncate(30);
        let path = write(dir.path(), "broken.mp4", &bytes);

        let err = MovieEdit::strip().apply_to_file(&path).unwrap_err();
        assert!(matches!(err, MetadataError::ExternalToolFailure(_)));
    }
}
