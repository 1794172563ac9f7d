//! Zero-copy payload splitting.

use bytes::Bytes;

/// Split `payload` into consecutive slices of at most `max_size` bytes.
///
/// Every slice but the last is exactly `max_size` long. An empty payload
/// yields no slices. A `max_size` of zero is treated as one.
pub fn split_payload(payload: &Bytes, max_size: usize) -> Vec<Bytes> {
    let max_size = max_size.max(1);
    let mut pieces = Vec::with_capacity(payload.len().div_ceil(max_size));
    let mut offset = 0;

    while offset < payload.len() {
        let end = (offset + max_size).min(payload.len());
        pieces.push(payload.slice(offset..end));
        offset = end;
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_concatenates_back() {
        let payload: Bytes = (0..=255u8).cycle().take(1000).collect::<Vec<_>>().into();

        for size in [1usize, 7, 128, 999, 1000, 1316, 4096] {
            let pieces = split_payload(&payload, size);

            assert_eq!(pieces.len(), payload.len().div_ceil(size));
            let (last, rest) = pieces.split_last().unwrap();
            assert!(rest.iter().all(|piece| piece.len() == size));
            assert!(!last.is_empty() && last.len() <= size);

            let joined: Vec<u8> = pieces.iter().flat_map(|p| p.iter().copied()).collect();
            assert_eq!(joined, payload.to_vec());
        }
    }

    #[test]
    fn test_split_empty() {
        assert!(split_payload(&Bytes::new(), 128).is_empty());
    }
}
