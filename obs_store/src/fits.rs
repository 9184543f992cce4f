//! Minimal single-HDU FITS writer (§6: the image repository's on-disk
//! format is `XXXXXXXX.fits`). `fitsrs` only exposes a reader in the
//! version this workspace pins, so the writer side is hand-rolled
//! directly against the format: 80-byte header cards packed into
//! 2880-byte blocks, followed by big-endian pixel data padded to the next
//! 2880-byte boundary.

use obs_core::image::{Image, MetadataValue, PixelBuffer};

const BLOCK: usize = 2880;
const CARD: usize = 80;

fn push_card(header: &mut Vec<u8>, card: String) {
    let mut bytes = card.into_bytes();
    bytes.resize(CARD, b' ');
    header.extend_from_slice(&bytes);
}

fn push_keyword_card(header: &mut Vec<u8>, keyword: &str, value: impl std::fmt::Display, comment: Option<&str>) {
    let mut card = format!("{:<8}= {:>20}", keyword, value.to_string());
    if let Some(comment) = comment {
        card.push_str(" / ");
        card.push_str(comment);
    }
    card.truncate(CARD);
    push_card(header, card);
}

fn push_string_card(header: &mut Vec<u8>, keyword: &str, value: &str, comment: Option<&str>) {
    let quoted = format!("'{}'", value.replace('\'', "''"));
    let mut card = format!("{:<8}= {:<20}", keyword, quoted);
    if let Some(comment) = comment {
        card.push_str(" / ");
        card.push_str(comment);
    }
    card.truncate(CARD);
    push_card(header, card);
}

fn pad_to_block(buf: &mut Vec<u8>, fill: u8) {
    let remainder = buf.len() % BLOCK;
    if remainder != 0 {
        buf.resize(buf.len() + (BLOCK - remainder), fill);
    }
}

/// Serializes `image` as a minimal FITS primary HDU. Returns the complete
/// byte buffer; the caller decides how to persist it (this crate writes it
/// under the configured repository directory).
pub fn encode(image: &Image) -> Vec<u8> {
    let (bitpix, naxis3) = match &image.pixels {
        PixelBuffer::U8(_) => (8, None),
        PixelBuffer::U16(_) => (16, None),
        PixelBuffer::F32(_) => (-32, None),
        PixelBuffer::Rgb8(_) => (8, Some(3u32)),
    };

    let mut header = Vec::new();
    push_keyword_card(&mut header, "SIMPLE", "T", Some("conforms to FITS standard"));
    push_keyword_card(&mut header, "BITPIX", bitpix, None);
    push_keyword_card(&mut header, "NAXIS", if naxis3.is_some() { 3 } else { 2 }, None);
    push_keyword_card(&mut header, "NAXIS1", image.width, None);
    push_keyword_card(&mut header, "NAXIS2", image.height, None);
    if let Some(n) = naxis3 {
        push_keyword_card(&mut header, "NAXIS3", n, None);
    }
    if let Some(pattern) = &image.bayer_pattern {
        push_string_card(&mut header, "BAYERPAT", pattern, Some("Bayer mosaic pattern"));
    }
    for (key, card) in image.metadata.iter() {
        let keyword = key.to_uppercase();
        match &card.value {
            MetadataValue::Str(s) => push_string_card(&mut header, &keyword, s, card.comment.as_deref()),
            MetadataValue::Int(i) => push_keyword_card(&mut header, &keyword, i, card.comment.as_deref()),
            MetadataValue::Float(f) => push_keyword_card(&mut header, &keyword, f, card.comment.as_deref()),
            MetadataValue::Bool(b) => {
                push_keyword_card(&mut header, &keyword, if *b { "T" } else { "F" }, card.comment.as_deref())
            }
        }
    }
    push_card(&mut header, "END".to_string());
    pad_to_block(&mut header, b' ');

    let mut data = Vec::new();
    match &image.pixels {
        PixelBuffer::U8(v) => data.extend_from_slice(v),
        PixelBuffer::U16(v) => {
            for sample in v {
                data.extend_from_slice(&sample.to_be_bytes());
            }
        }
        PixelBuffer::F32(v) => {
            for sample in v {
                data.extend_from_slice(&sample.to_be_bytes());
            }
        }
        PixelBuffer::Rgb8(v) => {
            for [r, g, b] in v {
                data.push(*r);
                data.push(*g);
                data.push(*b);
            }
        }
    }
    pad_to_block(&mut data, 0);

    header.extend_from_slice(&data);
    header
}

#[cfg(test)]
mod test {
    use super::*;
    use obs_core::image::{MetadataValue, Rectangle};

    #[test]
    fn test_encode_is_block_aligned() {
        let mut image = Image::new(4, 4, PixelBuffer::U16(vec![0; 16]));
        image.metadata.set("FILTER", MetadataValue::Str("Ha".into()), None);
        let bytes = encode(&image);
        assert_eq!(bytes.len() % BLOCK, 0);
        assert!(bytes.len() >= BLOCK * 2);
    }

    #[test]
    fn test_encode_header_names_correct_dimensions() {
        let image = Image::new(8, 6, PixelBuffer::U8(vec![0; 48]));
        let bytes = encode(&image);
        let header_text = String::from_utf8_lossy(&bytes[..BLOCK]);
        assert!(header_text.contains("NAXIS1  ="));
        assert!(header_text.contains(&8.to_string()));
        let _ = Rectangle::full_frame(8, 6);
    }
}
