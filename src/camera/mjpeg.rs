use bytes::{Bytes, BytesMut};
use log::warn;
use tokio_util::codec::Decoder;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// 1フレームの上限（これを超えて EOI が来なければ破棄）
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// 生の MJPEG バイト列を SOI..EOI 単位の JPEG に切り出すコーデック
#[derive(Debug)]
pub struct MjpegDecoder {
    max_frame_len: usize,
    /// EOI 探索の再開位置（同じ範囲を何度も走査しない）
    scan_from: usize,
}

impl MjpegDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            scan_from: 2,
        }
    }
}

impl Default for MjpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

impl Decoder for MjpegDecoder {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        loop {
            // フレーム先頭まで読み捨て
            match find_marker(src, SOI) {
                Some(0) => {}
                Some(start) => {
                    let _ = src.split_to(start);
                    self.scan_from = 2;
                }
                None => {
                    // 末尾の 0xFF は次チャンクの SOI の前半かもしれない
                    let keep = usize::from(src.last() == Some(&0xFF));
                    let drop = src.len() - keep;
                    let _ = src.split_to(drop);
                    self.scan_from = 2;
                    return Ok(None);
                }
            }

            let from = self.scan_from.min(src.len());
            match find_marker(&src[from..], EOI) {
                Some(offset) => {
                    let end = from + offset + 2;
                    self.scan_from = 2;
                    return Ok(Some(src.split_to(end).freeze()));
                }
                None if src.len() > self.max_frame_len => {
                    warn!("[camera] frame exceeds {} bytes without EOI, resyncing", self.max_frame_len);
                    // この SOI を捨てて次を探す
                    let _ = src.split_to(2);
                    self.scan_from = 2;
                }
                None => {
                    // マーカーが境界で分断されても拾えるよう1バイト戻す
                    self.scan_from = src.len().saturating_sub(1).max(2);
                    return Ok(None);
                }
            }
        }
    }

    /// ストリーム終端の途中フレームはエラーにせず捨てる
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                buf.clear();
                self.scan_from = 2;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut data = SOI.to_vec();
        data.extend_from_slice(payload);
        data.extend_from_slice(&EOI);
        data
    }

    #[test]
    fn test_splits_back_to_back_frames() {
        let mut decoder = MjpegDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&jpeg(b"one"));
        buf.extend_from_slice(&jpeg(b"two"));

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), Bytes::from(jpeg(b"one")));
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), Bytes::from(jpeg(b"two")));
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_skips_garbage_between_frames() {
        let mut decoder = MjpegDecoder::new();
        let mut buf = BytesMut::from(&b"garbage"[..]);
        buf.extend_from_slice(&jpeg(b"frame"));

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), Bytes::from(jpeg(b"frame")));
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = MjpegDecoder::new();
        let data = jpeg(b"split payload");
        let mut buf = BytesMut::new();

        // EOI マーカーの途中で切る
        let cut = data.len() - 1;
        buf.extend_from_slice(&data[..cut]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&data[cut..]);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), Bytes::from(data));
    }

    #[test]
    fn test_soi_split_across_chunks() {
        let mut decoder = MjpegDecoder::new();
        let data = jpeg(b"x");
        let mut buf = BytesMut::from(&b"junk\xFF"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], &[0xFF]);

        buf.extend_from_slice(&data[1..]);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), Bytes::from(data));
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let mut decoder = MjpegDecoder::with_max_frame_len(8);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&SOI);
        buf.extend_from_slice(&[0u8; 16]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&jpeg(b"ok"));
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), Bytes::from(jpeg(b"ok")));
    }
}
