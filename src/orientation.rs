//! EXIF orientation lookup and application.

use image::{imageops, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// EXIF orientation values (tag 0x0112).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    /// Map the raw EXIF value; anything unknown is `Normal`.
    pub fn from_exif(value: u32) -> Self {
        match value {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    /// Whether displaying with this orientation swaps width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90
                | Orientation::Transverse
                | Orientation::Rotate270
        )
    }

    /// Return the upright version of `img`.
    pub fn apply(self, img: &RgbaImage) -> RgbaImage {
        match self {
            Orientation::Normal => img.clone(),
            Orientation::FlipHorizontal => imageops::flip_horizontal(img),
            Orientation::Rotate180 => imageops::rotate180(img),
            Orientation::FlipVertical => imageops::flip_vertical(img),
            Orientation::Transpose => imageops::flip_horizontal(&imageops::rotate90(img)),
            Orientation::Rotate90 => imageops::rotate90(img),
            Orientation::Transverse => imageops::flip_horizontal(&imageops::rotate270(img)),
            Orientation::Rotate270 => imageops::rotate270(img),
        }
    }
}

/// Read the orientation tag from a file. Any failure yields `Normal`.
pub fn read_orientation(path: &Path) -> Orientation {
    let Ok(file) = File::open(path) else {
        return Orientation::Normal;
    };

    match exif::Reader::new().read_from_container(&mut BufReader::new(file)) {
        Ok(exif) => exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .map(Orientation::from_exif)
            .unwrap_or_default(),
        Err(e) => {
            tracing::trace!("No EXIF orientation for {:?}: {}", path, e);
            Orientation::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn marked(width: u32, height: u32) -> RgbaImage {
        let mut img = RgbaImage::new(width, height);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img
    }

    #[test]
    fn exif_values_map() {
        assert_eq!(Orientation::from_exif(1), Orientation::Normal);
        assert_eq!(Orientation::from_exif(6), Orientation::Rotate90);
        assert_eq!(Orientation::from_exif(8), Orientation::Rotate270);
        assert_eq!(Orientation::from_exif(42), Orientation::Normal);
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let img = marked(4, 2);
        let rotated = Orientation::Rotate90.apply(&img);
        assert_eq!(rotated.dimensions(), (2, 4));
        assert!(Orientation::Rotate90.swaps_axes());
        assert!(!Orientation::Rotate180.swaps_axes());
    }

    #[test]
    fn rotate180_moves_corner_pixel() {
        let img = marked(3, 3);
        let rotated = Orientation::Rotate180.apply(&img);
        assert_eq!(rotated.get_pixel(2, 2), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn unreadable_file_defaults_to_normal() {
        assert_eq!(
            read_orientation(Path::new("/no/such/file.jpg")),
            Orientation::Normal
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        marked(2, 2).save(&path).unwrap();
        assert_eq!(read_orientation(&path), Orientation::Normal);
    }
}
