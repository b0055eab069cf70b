use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;
use std::str::FromStr;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const ZIP_EMPTY_MAGIC: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];
const PNG_MAGIC: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];
const GIF_MAGIC: [u8; 4] = *b"GIF8";
const RIFF_MAGIC: [u8; 4] = *b"RIFF";
const WEBP_MAGIC: [u8; 4] = *b"WEBP";
const FTYP_MAGIC: [u8; 4] = *b"ftyp";
const JXL_CODESTREAM_MAGIC: [u8; 2] = [0xFF, 0x0A];
const JXL_CONTAINER_MAGIC: [u8; 12] = [0x00, 0x00, 0x00, 0x0C, 0x4A, 0x58, 0x4C, 0x20, 0x0D, 0x0A, 0x87, 0x0A];

/// Number of leading bytes [`ImageType::from_magic_bytes`] needs to see.
pub const MAGIC_LEN: usize = 12;

/// A supported chapter archive format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// Zip container, including comic book `.cbz` files.
    Zip,
}

impl ArchiveFormat {
    /// Detect the archive format from a file extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?;
        ext.parse().ok()
    }

    /// Detect the archive format from the first bytes of a file.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.starts_with(&ZIP_MAGIC) || bytes.starts_with(&ZIP_EMPTY_MAGIC)).then_some(ArchiveFormat::Zip)
    }

    /// File extensions recognised for this format, preferred first.
    #[must_use]
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ArchiveFormat::Zip => &["cbz", "zip"],
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cbz" | "zip" => Ok(ArchiveFormat::Zip),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Page image formats a reader is expected to display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageType {
    Avif,
    Gif,
    Heif,
    Jpeg,
    Jxl,
    Png,
    Webp,
}

impl ImageType {
    /// Guess the image type from a file name's extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?;
        match ext.to_lowercase().as_str() {
            "avif" => Some(ImageType::Avif),
            "gif" => Some(ImageType::Gif),
            "heic" | "heif" => Some(ImageType::Heif),
            "jpg" | "jpeg" | "jfif" => Some(ImageType::Jpeg),
            "jxl" => Some(ImageType::Jxl),
            "png" => Some(ImageType::Png),
            "webp" => Some(ImageType::Webp),
            _ => None,
        }
    }

    /// Detect the image type from its first [`MAGIC_LEN`] bytes.
    ///
    /// Returns `None` if nothing matches or the input is too short.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&JPEG_MAGIC) {
            return Some(ImageType::Jpeg);
        }
        if bytes.starts_with(&PNG_MAGIC) {
            return Some(ImageType::Png);
        }
        if bytes.starts_with(&GIF_MAGIC) {
            return Some(ImageType::Gif);
        }
        if bytes.starts_with(&RIFF_MAGIC) && bytes.get(8..12) == Some(&WEBP_MAGIC[..]) {
            return Some(ImageType::Webp);
        }
        if bytes.starts_with(&JXL_CODESTREAM_MAGIC) || bytes.starts_with(&JXL_CONTAINER_MAGIC) {
            return Some(ImageType::Jxl);
        }
        // ISO base media file: 4-byte box size, `ftyp`, then the major brand.
        if bytes.get(4..8) == Some(&FTYP_MAGIC[..]) {
            return match bytes.get(8..12)? {
                b"avif" | b"avis" => Some(ImageType::Avif),
                b"heic" | b"heix" | b"hevc" | b"mif1" | b"msf1" => Some(ImageType::Heif),
                _ => None,
            };
        }
        None
    }

    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            ImageType::Avif => "image/avif",
            ImageType::Gif => "image/gif",
            ImageType::Heif => "image/heif",
            ImageType::Jpeg => "image/jpeg",
            ImageType::Jxl => "image/jxl",
            ImageType::Png => "image/png",
            ImageType::Webp => "image/webp",
        }
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            ImageType::Avif => "avif",
            ImageType::Gif => "gif",
            ImageType::Heif => "heif",
            ImageType::Jpeg => "jpg",
            ImageType::Jxl => "jxl",
            ImageType::Png => "png",
            ImageType::Webp => "webp",
        }
    }
}

impl Display for ImageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.mime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Chapter 1.cbz", Some(ArchiveFormat::Zip))]
    #[case("chapter.ZIP", Some(ArchiveFormat::Zip))]
    #[case("chapter.rar", None)]
    #[case("chapter", None)]
    fn test_archive_from_path(#[case] path: &str, #[case] expected: Option<ArchiveFormat>) {
        assert_eq!(ArchiveFormat::from_path(path), expected);
    }

    #[test]
    fn test_archive_from_magic_bytes() {
        assert_eq!(ArchiveFormat::from_magic_bytes(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_magic_bytes(b"PK\x05\x06"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_magic_bytes(b"Rar!"), None);
    }

    #[test]
    fn test_archive_from_str_rejects_unknown() {
        let err = "7z".parse::<ArchiveFormat>().unwrap_err();
        assert_eq!(*err, ErrorKind::UnsupportedFormat("7z".to_string()));
    }

    #[rstest]
    #[case("001.jpg", Some(ImageType::Jpeg))]
    #[case("001.JPEG", Some(ImageType::Jpeg))]
    #[case("cover.png", Some(ImageType::Png))]
    #[case("anim.gif", Some(ImageType::Gif))]
    #[case("p.webp", Some(ImageType::Webp))]
    #[case("p.heic", Some(ImageType::Heif))]
    #[case("ComicInfo.xml", None)]
    #[case("noext", None)]
    fn test_image_from_path(#[case] path: &str, #[case] expected: Option<ImageType>) {
        assert_eq!(ImageType::from_path(path), expected);
    }

    #[rstest]
    #[case(&[0xFF, 0xD8, 0xFF, 0xE0], Some(ImageType::Jpeg))]
    #[case(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A], Some(ImageType::Png))]
    #[case(b"GIF89a", Some(ImageType::Gif))]
    #[case(b"RIFF\x00\x00\x00\x00WEBPVP8 ", Some(ImageType::Webp))]
    #[case(b"RIFF\x00\x00\x00\x00WAVEfmt ", None)]
    #[case(b"\x00\x00\x00\x1cftypavif", Some(ImageType::Avif))]
    #[case(b"\x00\x00\x00\x18ftypheic", Some(ImageType::Heif))]
    #[case(b"\x00\x00\x00\x18ftypisom", None)]
    #[case(&[0xFF, 0x0A, 0x00], Some(ImageType::Jxl))]
    #[case(b"<?xml", None)]
    #[case(b"", None)]
    fn test_image_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Option<ImageType>) {
        assert_eq!(ImageType::from_magic_bytes(bytes), expected);
    }

    #[test]
    fn test_image_mime() {
        assert_eq!(ImageType::Webp.mime(), "image/webp");
        assert_eq!(ImageType::Jpeg.to_string(), "image/jpeg");
        assert_eq!(ImageType::Jpeg.extension(), "jpg");
    }
}
