// SPDX-License-Identifier: GPL-3.0-or-later
use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageResult, RgbImage};
use tracing::trace;

#[cfg(feature = "mozjpeg")]
use mozjpeg::{ColorSpace, Compress};

#[cfg(feature = "mozjpeg")]
fn encode_jpeg_mozjpeg(image: &RgbImage, quality: u8) -> Option<Bytes> {
    trace!("using mozjpeg to encode JPEG image");
    // A fresh encoder each call keeps this usable from anywhere, at the cost of a little setup.
    let mut jpeg_encoder = Compress::new(ColorSpace::JCS_RGB);
    jpeg_encoder.set_quality(quality as f32);
    jpeg_encoder.set_mem_dest();
    jpeg_encoder.set_size(image.width() as usize, image.height() as usize);
    jpeg_encoder.start_compress();
    if !jpeg_encoder.write_scanlines(image.as_raw()) {
        return None;
    }
    jpeg_encoder.finish_compress();
    jpeg_encoder.data_to_vec().ok().map(Bytes::from)
}

fn encode_jpeg_image(image: &RgbImage, quality: u8) -> ImageResult<Bytes> {
    trace!("using image crate to encode JPEG image");
    let mut jpeg_buf = BytesMut::new().writer();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_buf, quality);
    encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
    Ok(jpeg_buf.into_inner().freeze())
}

#[cfg(not(feature = "mozjpeg"))]
pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Bytes> {
    encode_jpeg_image(image, quality)
}

#[cfg(feature = "mozjpeg")]
pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Bytes> {
    match encode_jpeg_mozjpeg(image, quality) {
        Some(encoded) => Ok(encoded),
        None => {
            tracing::warn!("mozjpeg failed to encode frame, falling back to the image crate");
            encode_jpeg_image(image, quality)
        }
    }
}

#[cfg(test)]
mod test {
    use image::{GenericImageView, Rgb, RgbImage};

    use super::encode_jpeg;

    fn checkerboard() -> RgbImage {
        RgbImage::from_fn(40, 30, |x, y| {
            if (x / 5 + y / 5) % 2 == 0 {
                Rgb([255, 64, 0])
            } else {
                Rgb([0, 32, 200])
            }
        })
    }

    #[test]
    fn jpeg_markers() {
        let encoded = encode_jpeg(&checkerboard(), 90).unwrap();
        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);
        assert_eq!(&encoded[encoded.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn decodes_to_same_size() {
        let encoded = encode_jpeg(&checkerboard(), 85).unwrap();
        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!(decoded.dimensions(), (40, 30));
    }

    #[test]
    fn quality_changes_size() {
        let low = encode_jpeg(&checkerboard(), 10).unwrap();
        let high = encode_jpeg(&checkerboard(), 100).unwrap();
        assert!(low.len() < high.len());
    }
}
