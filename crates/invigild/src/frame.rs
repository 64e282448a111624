use invigil_core::FramePixels;

/// Decode a transport image (JPEG/PNG bytes from the exam client) into
/// grayscale pixels. Any decode failure yields `None`; the classifier
/// treats a missing frame as a faceless one.
pub fn decode_frame(bytes: &[u8]) -> Option<FramePixels> {
    let decoded = image::load_from_memory(bytes).ok()?;
    let gray = decoded.to_luma8();
    let (width, height) = gray.dimensions();
    Some(FramePixels {
        data: gray.into_raw(),
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma};

    fn png_bytes(width: u32, height: u32, value: u8) -> Vec<u8> {
        let img = GrayImage::from_pixel(width, height, Luma([value]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn decodes_valid_png() {
        let frame = decode_frame(&png_bytes(6, 4, 77)).unwrap();
        assert_eq!(frame.width, 6);
        assert_eq!(frame.height, 4);
        assert_eq!(frame.data.len(), 24);
        assert!(frame.data.iter().all(|&p| p == 77));
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_frame(b"definitely not an image").is_none());
    }

    #[test]
    fn rejects_empty() {
        assert!(decode_frame(&[]).is_none());
    }

    #[test]
    fn rejects_truncated_png() {
        let mut bytes = png_bytes(8, 8, 10);
        bytes.truncate(bytes.len() / 2);
        assert!(decode_frame(&bytes).is_none());
    }
}
