use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, ImageFormat, Rgb, RgbImage};
use img_parts::{Bytes, ImageEXIF};

pub const CANVAS_SIZE_DEFAULT: u32 = 480;
pub const JPEG_QUALITY_DEFAULT: u8 = 85;
/// Share of a piece's longer side added around it so tabs have pixels to draw.
pub const TAB_EXTENSION_RATIO: f64 = 0.25;
pub const CANVAS_BACKGROUND: Rgb<u8> = Rgb([240, 240, 240]);
pub const OUTSIDE_FILL: Rgb<u8> = Rgb([192, 192, 192]);

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
    #[error("unsupported image format")]
    Unsupported,
    #[error("invalid image dimensions")]
    Dimensions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Jpeg,
    Png,
}

impl SourceFormat {
    fn image_format(self) -> ImageFormat {
        match self {
            SourceFormat::Jpeg => ImageFormat::Jpeg,
            SourceFormat::Png => ImageFormat::Png,
        }
    }
}

pub fn sniff_format(bytes: &[u8]) -> Option<SourceFormat> {
    if is_png(bytes) {
        Some(SourceFormat::Png)
    } else if is_jpeg(bytes) {
        Some(SourceFormat::Jpeg)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CutterConfig {
    pub canvas_size: u32,
    pub jpeg_quality: u8,
}

impl Default for CutterConfig {
    fn default() -> Self {
        Self {
            canvas_size: CANVAS_SIZE_DEFAULT,
            jpeg_quality: JPEG_QUALITY_DEFAULT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// The fitted board image plus one bitmap per piece, row-major.
#[derive(Debug, Clone)]
pub struct CutPuzzle {
    pub board: EncodedImage,
    pub pieces: Vec<EncodedImage>,
}

pub struct PuzzleCutter {
    config: CutterConfig,
}

impl PuzzleCutter {
    pub fn new(config: CutterConfig) -> Self {
        Self { config }
    }

    pub fn cut(&self, bytes: &[u8], grid: u32) -> Result<CutPuzzle, PipelineError> {
        if grid == 0 || grid > self.config.canvas_size {
            return Err(PipelineError::Dimensions);
        }
        let source = decode_rgb8(bytes)?;
        let canvas = self.fit_to_square(&source)?;
        let quality = self.config.jpeg_quality;

        let board = EncodedImage {
            bytes: encode_jpeg(&canvas, quality)?,
            width: canvas.width(),
            height: canvas.height(),
        };
        let mut pieces = Vec::with_capacity((grid * grid) as usize);
        for row in 0..grid {
            for col in 0..grid {
                let piece = cut_piece(&canvas, row, col, grid);
                pieces.push(EncodedImage {
                    bytes: encode_jpeg(&piece, quality)?,
                    width: piece.width(),
                    height: piece.height(),
                });
            }
        }
        Ok(CutPuzzle { board, pieces })
    }

    /// Scales `source` to fit the configured square, preserving aspect ratio, and centers it
    /// on a light background.
    pub fn fit_to_square(&self, source: &RgbImage) -> Result<RgbImage, PipelineError> {
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::Dimensions);
        }
        let target = self.config.canvas_size;
        let aspect = f64::from(width) / f64::from(height);
        let (next_width, next_height) = if aspect > 1.0 {
            (target, ((f64::from(target) / aspect) as u32).max(1))
        } else {
            (((f64::from(target) * aspect) as u32).max(1), target)
        };
        let scaled = image::imageops::resize(source, next_width, next_height, FilterType::Lanczos3);

        let mut canvas = ImageBuffer::from_pixel(target, target, CANVAS_BACKGROUND);
        let x = (target - next_width) / 2;
        let y = (target - next_height) / 2;
        image::imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
        Ok(canvas)
    }
}

impl Default for PuzzleCutter {
    fn default() -> Self {
        Self::new(CutterConfig::default())
    }
}

/// Piece bitmap for `(row, col)` including the tab margin. Margin pixels that fall outside
/// the canvas are filled with [`OUTSIDE_FILL`].
pub fn cut_piece(canvas: &RgbImage, row: u32, col: u32, grid: u32) -> RgbImage {
    let (canvas_width, canvas_height) = canvas.dimensions();
    let piece_width = canvas_width / grid;
    let piece_height = canvas_height / grid;
    let extension = (f64::from(piece_width.max(piece_height)) * TAB_EXTENSION_RATIO) as u32;
    let out_width = piece_width + extension * 2;
    let out_height = piece_height + extension * 2;

    let left = i64::from(col * piece_width) - i64::from(extension);
    let top = i64::from(row * piece_height) - i64::from(extension);
    let src_x = left.max(0);
    let src_y = top.max(0);
    let src_right = (left + i64::from(out_width)).min(i64::from(canvas_width));
    let src_bottom = (top + i64::from(out_height)).min(i64::from(canvas_height));

    let mut piece = ImageBuffer::from_pixel(out_width, out_height, OUTSIDE_FILL);
    if src_right > src_x && src_bottom > src_y {
        let visible = image::imageops::crop_imm(
            canvas,
            src_x as u32,
            src_y as u32,
            (src_right - src_x) as u32,
            (src_bottom - src_y) as u32,
        )
        .to_image();
        image::imageops::overlay(&mut piece, &visible, src_x - left, src_y - top);
    }
    piece
}

pub fn decode_rgb8(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let format = sniff_format(bytes).ok_or(PipelineError::Unsupported)?;
    let orientation = extract_exif_orientation(bytes);
    let image = image::load_from_memory_with_format(bytes, format.image_format())
        .map_err(|err| PipelineError::Decode(err.to_string()))?;
    Ok(apply_exif_orientation(image.to_rgb8(), orientation))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::Dimensions);
    }
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|err| PipelineError::Encode(err.to_string()))?;
    Ok(out.into_inner())
}

pub fn extract_exif(bytes: &[u8]) -> Option<Vec<u8>> {
    let data = Bytes::copy_from_slice(bytes);

    if let Ok(jpeg) = img_parts::jpeg::Jpeg::from_bytes(data.clone()) {
        if let Some(exif) = jpeg.exif() {
            return Some(exif.as_ref().to_vec());
        }
    }
    if let Ok(png) = img_parts::png::Png::from_bytes(data) {
        if let Some(exif) = png.exif() {
            return Some(exif.as_ref().to_vec());
        }
    }
    None
}

pub fn extract_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let exif = extract_exif(bytes)?;
    parse_exif_orientation(&exif)
}

#[derive(Clone, Copy)]
enum ExifEndian {
    Little,
    Big,
}

fn parse_exif_orientation(exif: &[u8]) -> Option<u16> {
    let data = if exif.starts_with(b"Exif\0\0") {
        exif.get(6..)?
    } else {
        exif
    };
    if data.len() < 8 {
        return None;
    }
    let endian = match &data[..2] {
        b"II" => ExifEndian::Little,
        b"MM" => ExifEndian::Big,
        _ => return None,
    };
    if read_exif_u16(data, 2, endian)? != 42 {
        return None;
    }
    let ifd_offset = read_exif_u32(data, 4, endian)? as usize;
    let entries = read_exif_u16(data, ifd_offset, endian)? as usize;
    for index in 0..entries {
        let entry = ifd_offset + 2 + index * 12;
        if entry + 12 > data.len() {
            break;
        }
        if read_exif_u16(data, entry, endian)? != 0x0112 {
            continue;
        }
        // SHORT, inline in the value field
        let field_type = read_exif_u16(data, entry + 2, endian)?;
        if field_type != 3 {
            return None;
        }
        let value = read_exif_u16(data, entry + 8, endian)?;
        return (1..=8).contains(&value).then_some(value);
    }
    None
}

fn read_exif_u16(data: &[u8], offset: usize, endian: ExifEndian) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(match endian {
        ExifEndian::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
        ExifEndian::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
    })
}

fn read_exif_u32(data: &[u8], offset: usize, endian: ExifEndian) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(match endian {
        ExifEndian::Little => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ExifEndian::Big => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    })
}

fn apply_exif_orientation(image: RgbImage, orientation: Option<u16>) -> RgbImage {
    use image::imageops::{flip_horizontal, flip_vertical, rotate180, rotate270, rotate90};
    match orientation {
        Some(2) => flip_horizontal(&image),
        Some(3) => rotate180(&image),
        Some(4) => flip_vertical(&image),
        Some(5) => rotate270(&flip_horizontal(&image)),
        Some(6) => rotate90(&image),
        Some(7) => rotate90(&flip_horizontal(&image)),
        Some(8) => rotate270(&image),
        _ => image,
    }
}

fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
}

fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8, 0xFF])
}
