use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use multihash::{Hasher, Sha2_256};
use num_traits::Num;

/// Modification stamps are milliseconds since the Unix epoch
pub type Stamp = u64;

/// Make sure bounds are ordered correctly, eg the start of an interval comes before its end.
///
pub fn rearrange<N>(lower: N, upper: N) -> (N, N)
where
    N: Num + Debug + PartialOrd,
{
    if lower > upper {
        (upper, lower)
    } else {
        (lower, upper)
    }
}

/// Stable 32 bit content hash: the leading four bytes of the SHA2-256 digest of `data`.
///
pub(crate) fn content_hash(data: &[u8]) -> u32 {
    let mut hasher = Sha2_256::default();
    hasher.update(data);
    let digest = hasher.finalize();

    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub(crate) fn to_stamp(time: SystemTime) -> Stamp {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as Stamp,
        Err(_) => 0,
    }
}

/// Current wall clock time as a `Stamp`
pub fn now() -> Stamp {
    to_stamp(SystemTime::now())
}

/// Modification stamp of a file on disk, or `None` if it doesn't exist.
///
pub fn file_stamp(path: &Path) -> io::Result<Option<Stamp>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(to_stamp(metadata.modified()?))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearrange() {
        assert_eq!(rearrange(6, 0), (0, 6));
        assert_eq!(rearrange(0, 6), (0, 6));
        assert_eq!(rearrange(2.5, -1.0), (-1.0, 2.5));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(content_hash(b"lambert"), content_hash(b"lambert"));
        assert_ne!(content_hash(b"lambert"), content_hash(b"mercator"));
    }

    #[test]
    fn test_file_stamp() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stamped");
        assert_eq!(file_stamp(&path)?, None);

        fs::write(&path, b"hi")?;
        let stamp = file_stamp(&path)?.expect("file should exist");
        assert!(stamp > 0);
        assert!(stamp <= now());

        Ok(())
    }
}
