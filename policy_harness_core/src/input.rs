/// A fuzz case: the raw bytes handed to one harness iteration.
pub trait Input: Clone + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;

    /// Number of newline-delimited records, counting an unterminated tail.
    fn record_count(&self) -> usize {
        let bytes = self.as_bytes();
        let newlines = bytes.iter().filter(|&&b| b == b'\n').count();
        match bytes.last() {
            None => 0,
            Some(b'\n') => newlines,
            Some(_) => newlines + 1,
        }
    }
}

impl Input for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_u8_counts_records() {
        let data: Vec<u8> = b"user=a\nuid=1\nargv=/bin/ls".to_vec();
        let empty: Vec<u8> = vec![];
        assert_eq!(data.record_count(), 3);
        assert_eq!(b"a\n\n".to_vec().record_count(), 2);
        assert_eq!(empty.record_count(), 0);
        assert!(empty.is_empty());
        assert_eq!(Input::len(&data), 25);
    }
}
